use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::status::{CollectionStatus, Repository, Track, TrackUpdate};
use crate::store::{RepoLookup, StatusFilter, StatusStore};
use crate::{Error, Result};

/// Status store and repository table held in process memory.
///
/// Used by tests and by the worker's dry-run mode. Every write takes the
/// table lock for the duration of one track update.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    repos: Arc<RwLock<BTreeMap<i64, Repository>>>,
    statuses: Arc<RwLock<BTreeMap<i64, CollectionStatus>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a repository and its all-`Pending` status row.
    pub async fn add_repository(&self, repo_git: &str) -> Repository {
        let mut repos = self.repos.write().await;
        if let Some(existing) = repos.values().find(|r| r.repo_git == repo_git) {
            return existing.clone();
        }

        let repo_id = repos.keys().next_back().map(|id| id + 1).unwrap_or(1);
        let repo = Repository::new(repo_id, repo_git);
        repos.insert(repo_id, repo.clone());

        let mut statuses = self.statuses.write().await;
        statuses.insert(repo_id, CollectionStatus::new(repo_id));

        tracing::debug!("Registered repository {} as repo_id {}", repo_git, repo_id);

        repo
    }

    #[cfg(test)]
    pub(crate) async fn remove_status(&self, repo_id: i64) {
        self.statuses.write().await.remove(&repo_id);
    }
}

#[async_trait]
impl StatusStore for InMemoryStore {
    async fn register(&self, repo_id: i64) -> Result<CollectionStatus> {
        if !self.repos.read().await.contains_key(&repo_id) {
            return Err(Error::RepoNotFound(format!("repo_id {}", repo_id)));
        }

        let mut statuses = self.statuses.write().await;
        Ok(statuses
            .entry(repo_id)
            .or_insert_with(|| CollectionStatus::new(repo_id))
            .clone())
    }

    async fn get(&self, repo_id: i64) -> Result<CollectionStatus> {
        let statuses = self.statuses.read().await;
        statuses
            .get(&repo_id)
            .cloned()
            .ok_or(Error::StatusNotFound(repo_id))
    }

    async fn find(&self, filter: &StatusFilter, limit: usize) -> Result<Vec<String>> {
        let repos = self.repos.read().await;
        let statuses = self.statuses.read().await;

        Ok(statuses
            .values()
            .filter(|status| filter.matches(status))
            .filter_map(|status| repos.get(&status.repo_id))
            .map(|repo| repo.repo_git.clone())
            .take(limit)
            .collect())
    }

    async fn set_track(&self, repo_id: i64, track: Track, update: TrackUpdate) -> Result<()> {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .get_mut(&repo_id)
            .ok_or(Error::StatusNotFound(repo_id))?;

        update.apply(status.track_mut(track));
        Ok(())
    }

    async fn set_track_if_handle(
        &self,
        repo_id: i64,
        track: Track,
        expected_handle: &str,
        update: TrackUpdate,
    ) -> Result<bool> {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .get_mut(&repo_id)
            .ok_or(Error::StatusNotFound(repo_id))?;

        let current = status.track_mut(track);
        if current.task_handle.as_deref() != Some(expected_handle) {
            return Ok(false);
        }

        update.apply(current);
        Ok(true)
    }

    async fn clear_task_handle(&self, repo_id: i64, track: Track) -> Result<()> {
        let mut statuses = self.statuses.write().await;
        let status = statuses
            .get_mut(&repo_id)
            .ok_or(Error::StatusNotFound(repo_id))?;

        status.track_mut(track).task_handle = None;
        Ok(())
    }

    async fn find_by_task_handle(&self, handle: &str) -> Result<Vec<(i64, Track)>> {
        let statuses = self.statuses.read().await;
        Ok(statuses
            .values()
            .flat_map(|status| {
                status
                    .tracks_with_handle(handle)
                    .into_iter()
                    .map(move |track| (status.repo_id, track))
            })
            .collect())
    }
}

#[async_trait]
impl RepoLookup for InMemoryStore {
    async fn find_by_location(&self, repo_git: &str) -> Result<Option<Repository>> {
        let repos = self.repos.read().await;
        Ok(repos.values().find(|r| r.repo_git == repo_git).cloned())
    }
}
