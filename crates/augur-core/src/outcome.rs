use async_trait::async_trait;
use std::sync::Arc;

use crate::graph::{ChainFailure, DispatchHandle, FailureSink, LinkageError};
use crate::status::{now_timestamp, CollectionState, CollectionStatus, Repository, Track, TrackUpdate};
use crate::store::{RepoLookup, StatusStore};
use crate::{Error, Result};

/// Applies chain lifecycle signals to the status store.
///
/// These handlers are the only writers of collection status. The orchestrator
/// and the phases themselves never touch the store directly.
#[derive(Clone)]
pub struct OutcomeHandlers {
    store: Arc<dyn StatusStore>,
    repos: Arc<dyn RepoLookup>,
}

impl OutcomeHandlers {
    pub fn new(store: Arc<dyn StatusStore>, repos: Arc<dyn RepoLookup>) -> Self {
        Self { store, repos }
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    async fn load(&self, repo_git: &str) -> Result<(Repository, CollectionStatus)> {
        let repo = self
            .repos
            .find_by_location(repo_git)
            .await?
            .ok_or_else(|| Error::RepoNotFound(repo_git.to_string()))?;
        let status = self.store.get(repo.repo_id).await?;
        Ok((repo, status))
    }

    /// Records a freshly submitted chain: the track becomes `Collecting` and
    /// remembers the dispatch handle until the chain settles.
    pub async fn on_dispatched(
        &self,
        track: Track,
        repo_git: &str,
        handle: &DispatchHandle,
    ) -> Result<()> {
        let (repo, status) = self.load(repo_git).await.map_err(|e| {
            tracing::error!("Cannot record dispatch of {} for '{}': {}", handle, repo_git, e);
            e
        })?;

        if let Some(previous) = &status.track(track).task_handle {
            tracing::warn!(
                "Repo '{}' {} track already held handle {}, replacing with {}",
                repo_git,
                track,
                previous,
                handle
            );
        }

        tracing::info!(
            "Setting repo_id {} to collecting on {} track for repo: {}",
            repo.repo_id,
            track,
            repo_git
        );

        self.store
            .set_track(
                repo.repo_id,
                track,
                TrackUpdate::new(CollectionState::Collecting).with_task_handle(handle.as_str()),
            )
            .await
    }

    /// Marks `track` of `repo_git` as successfully collected.
    ///
    /// A missing repository or status row means the bookkeeping is broken: it
    /// is logged and returned as an error, and nothing is written.
    pub async fn on_success(&self, track: Track, repo_git: &str) -> Result<()> {
        tracing::info!("Repo '{}' succeeded through {} collection", repo_git, track);

        let (repo, _) = self.load(repo_git).await.map_err(|e| {
            tracing::error!(
                "Task with repo_git of {} succeeded on {} track but its status could not be loaded: {}",
                repo_git,
                track,
                e
            );
            e
        })?;

        self.store
            .set_track(
                repo.repo_id,
                track,
                TrackUpdate::new(CollectionState::Success).with_last_collected_at(now_timestamp()),
            )
            .await
    }

    /// Marks every track holding `handle` as `Error` and clears the handle.
    ///
    /// Returns the `(repo_id, track)` pairs that were updated. An unknown
    /// handle is not an error: the repository may have been removed while the
    /// chain ran. A track re-dispatched between lookup and write keeps its
    /// new handle.
    pub async fn record_failure(
        &self,
        handle: &DispatchHandle,
        error: &str,
        trace: &str,
    ) -> Result<Vec<(i64, Track)>> {
        tracing::error!("Task {} raised exception: {}\n{}", handle, error, trace);

        let matches = self.store.find_by_task_handle(handle.as_str()).await?;

        if matches.is_empty() {
            tracing::info!("No collection status holds handle {}, nothing to update", handle);
            return Ok(matches);
        }

        if matches.len() > 1 {
            tracing::warn!(
                "Handle {} is held by {} tracks ({:?}); marking all of them as failed",
                handle,
                matches.len(),
                matches
            );
        }

        let mut updated = Vec::with_capacity(matches.len());
        for (repo_id, track) in matches {
            let applied = self
                .store
                .set_track_if_handle(
                    repo_id,
                    track,
                    handle.as_str(),
                    TrackUpdate::new(CollectionState::Error),
                )
                .await?;

            if applied {
                updated.push((repo_id, track));
            } else {
                tracing::info!(
                    "repo_id {} {} track moved on from handle {}, leaving it alone",
                    repo_id,
                    track,
                    handle
                );
            }
        }

        Ok(updated)
    }

    /// True when a phase for `track` of `repo_git` must not run because the
    /// chain it belongs to has already failed.
    pub async fn should_skip(&self, track: Track, repo_git: &str) -> Result<bool> {
        let (_, status) = self.load(repo_git).await?;
        Ok(status.track(track).status == CollectionState::Error)
    }
}

#[async_trait]
impl FailureSink for OutcomeHandlers {
    async fn on_failure(&self, failure: ChainFailure) {
        if let Some(control) = &failure.control {
            match control.truncate() {
                Ok(dropped) => {
                    tracing::debug!("Dropped {} pending steps of chain {}", dropped, failure.handle)
                }
                Err(LinkageError::NotChained) => {}
                Err(e) => {
                    tracing::error!("Could not mutate chain {}: {}", failure.handle, e)
                }
            }
        }

        if let Err(e) = self
            .record_failure(&failure.handle, &failure.error, &failure.trace)
            .await
        {
            tracing::error!("Failed to record failure of chain {}: {}", failure.handle, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ChainControl;
    use crate::memory::InMemoryStore;
    use crate::store::StatusFilter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REPO: &str = "https://github.com/chaoss/augur";

    async fn setup() -> (InMemoryStore, OutcomeHandlers, Repository) {
        let store = InMemoryStore::new();
        let repo = store.add_repository(REPO).await;
        let handlers = OutcomeHandlers::new(Arc::new(store.clone()), Arc::new(store.clone()));
        (store, handlers, repo)
    }

    struct CountingControl {
        calls: AtomicUsize,
        result: std::result::Result<usize, LinkageError>,
    }

    impl ChainControl for CountingControl {
        fn truncate(&self) -> std::result::Result<usize, LinkageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn test_dispatch_then_success() {
        let (store, handlers, repo) = setup().await;
        let handle = DispatchHandle::new("chain-1");

        handlers.on_dispatched(Track::Core, REPO, &handle).await.unwrap();
        let status = store.get(repo.repo_id).await.unwrap();
        assert_eq!(status.core.status, CollectionState::Collecting);
        assert_eq!(status.core.task_handle.as_deref(), Some("chain-1"));

        handlers.on_success(Track::Core, REPO).await.unwrap();
        let status = store.get(repo.repo_id).await.unwrap();
        assert_eq!(status.core.status, CollectionState::Success);
        assert_eq!(status.core.task_handle, None);
        assert!(status.core.last_collected_at.is_some());
        assert_eq!(status.secondary, CollectionStatus::new(repo.repo_id).secondary);
        assert_eq!(status.facade, CollectionStatus::new(repo.repo_id).facade);
    }

    #[tokio::test]
    async fn test_success_for_unknown_repo_is_an_error() {
        let (store, handlers, repo) = setup().await;

        let err = handlers
            .on_success(Track::Core, "https://github.com/nobody/nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepoNotFound(_)));
        assert_eq!(store.get(repo.repo_id).await.unwrap(), CollectionStatus::new(repo.repo_id));
    }

    #[tokio::test]
    async fn test_success_with_missing_status_row() {
        let store = InMemoryStore::new();
        let repo = store.add_repository(REPO).await;
        let handlers = OutcomeHandlers::new(Arc::new(store.clone()), Arc::new(store.clone()));
        store.remove_status(repo.repo_id).await;

        let err = handlers.on_success(Track::Facade, REPO).await.unwrap_err();
        assert!(matches!(err, Error::StatusNotFound(id) if id == repo.repo_id));
    }

    #[tokio::test]
    async fn test_failure_marks_matching_track_only() {
        let (store, handlers, repo) = setup().await;
        handlers
            .on_dispatched(Track::Secondary, REPO, &DispatchHandle::new("sec"))
            .await
            .unwrap();
        handlers
            .on_dispatched(Track::Core, REPO, &DispatchHandle::new("core"))
            .await
            .unwrap();

        let updated = handlers
            .record_failure(&DispatchHandle::new("sec"), "boom", "trace")
            .await
            .unwrap();
        assert_eq!(updated, vec![(repo.repo_id, Track::Secondary)]);

        let status = store.get(repo.repo_id).await.unwrap();
        assert_eq!(status.secondary.status, CollectionState::Error);
        assert_eq!(status.secondary.task_handle, None);
        assert_eq!(status.core.status, CollectionState::Collecting);
        assert_eq!(status.core.task_handle.as_deref(), Some("core"));
    }

    #[tokio::test]
    async fn test_failure_with_unknown_handle_is_noop() {
        let (store, handlers, repo) = setup().await;
        let handle = DispatchHandle::new("gone");
        handlers.on_dispatched(Track::Facade, REPO, &handle).await.unwrap();

        let failure = ChainFailure {
            handle: handle.clone(),
            error: "boom".to_string(),
            trace: String::new(),
            control: None,
        };
        handlers.on_failure(failure.clone()).await;
        let after_first = store.get(repo.repo_id).await.unwrap();
        assert_eq!(after_first.facade.status, CollectionState::Error);

        // The handle is cleared now, so a second report matches nothing.
        handlers.on_failure(failure).await;
        assert_eq!(store.get(repo.repo_id).await.unwrap(), after_first);
        assert!(handlers
            .record_failure(&handle, "boom", "")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failure_updates_every_track_sharing_a_handle() {
        let (store, handlers, repo) = setup().await;
        let handle = DispatchHandle::new("shared");
        handlers.on_dispatched(Track::Core, REPO, &handle).await.unwrap();
        handlers.on_dispatched(Track::Facade, REPO, &handle).await.unwrap();

        let updated = handlers.record_failure(&handle, "boom", "").await.unwrap();
        assert_eq!(updated.len(), 2);

        let status = store.get(repo.repo_id).await.unwrap();
        assert_eq!(status.core.status, CollectionState::Error);
        assert_eq!(status.facade.status, CollectionState::Error);
        assert_eq!(status.secondary.status, CollectionState::Pending);
    }

    #[tokio::test]
    async fn test_failure_truncates_chain() {
        let (_, handlers, _) = setup().await;

        for result in [Ok(2), Err(LinkageError::NotChained), Err(LinkageError::Failed("x".into()))] {
            let control = Arc::new(CountingControl {
                calls: AtomicUsize::new(0),
                result,
            });
            handlers
                .on_failure(ChainFailure {
                    handle: DispatchHandle::new("h"),
                    error: "boom".to_string(),
                    trace: String::new(),
                    control: Some(control.clone()),
                })
                .await;
            assert_eq!(control.calls.load(Ordering::SeqCst), 1);
        }
    }

    /// Re-dispatches the core track right after a handle lookup, the way a
    /// new pass can between a failure being reported and written.
    struct RedispatchingStore {
        inner: InMemoryStore,
        next_handle: &'static str,
    }

    #[async_trait]
    impl StatusStore for RedispatchingStore {
        async fn register(&self, repo_id: i64) -> Result<CollectionStatus> {
            self.inner.register(repo_id).await
        }

        async fn get(&self, repo_id: i64) -> Result<CollectionStatus> {
            self.inner.get(repo_id).await
        }

        async fn find(&self, filter: &StatusFilter, limit: usize) -> Result<Vec<String>> {
            self.inner.find(filter, limit).await
        }

        async fn set_track(&self, repo_id: i64, track: Track, update: TrackUpdate) -> Result<()> {
            self.inner.set_track(repo_id, track, update).await
        }

        async fn set_track_if_handle(
            &self,
            repo_id: i64,
            track: Track,
            expected_handle: &str,
            update: TrackUpdate,
        ) -> Result<bool> {
            self.inner
                .set_track_if_handle(repo_id, track, expected_handle, update)
                .await
        }

        async fn clear_task_handle(&self, repo_id: i64, track: Track) -> Result<()> {
            self.inner.clear_task_handle(repo_id, track).await
        }

        async fn find_by_task_handle(&self, handle: &str) -> Result<Vec<(i64, Track)>> {
            let matches = self.inner.find_by_task_handle(handle).await?;
            for (repo_id, track) in &matches {
                self.inner
                    .set_track(
                        *repo_id,
                        *track,
                        TrackUpdate::new(CollectionState::Collecting).with_task_handle(self.next_handle),
                    )
                    .await?;
            }
            Ok(matches)
        }
    }

    #[tokio::test]
    async fn test_failure_spares_track_redispatched_meanwhile() {
        let inner = InMemoryStore::new();
        let repo = inner.add_repository(REPO).await;
        let store = Arc::new(RedispatchingStore {
            inner: inner.clone(),
            next_handle: "second",
        });
        let handlers = OutcomeHandlers::new(store, Arc::new(inner.clone()));
        let first = DispatchHandle::new("first");
        handlers.on_dispatched(Track::Core, REPO, &first).await.unwrap();

        let updated = handlers.record_failure(&first, "boom", "").await.unwrap();

        assert!(updated.is_empty());
        let status = inner.get(repo.repo_id).await.unwrap();
        assert_eq!(status.core.status, CollectionState::Collecting);
        assert_eq!(status.core.task_handle.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_should_skip_after_failure() {
        let (_, handlers, _) = setup().await;
        let handle = DispatchHandle::new("c");
        handlers.on_dispatched(Track::Core, REPO, &handle).await.unwrap();
        assert!(!handlers.should_skip(Track::Core, REPO).await.unwrap());

        handlers.record_failure(&handle, "boom", "").await.unwrap();
        assert!(handlers.should_skip(Track::Core, REPO).await.unwrap());
        assert!(!handlers.should_skip(Track::Secondary, REPO).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_success_on_two_tracks() {
        let (store, handlers, repo) = setup().await;
        handlers
            .on_dispatched(Track::Core, REPO, &DispatchHandle::new("c"))
            .await
            .unwrap();
        handlers
            .on_dispatched(Track::Secondary, REPO, &DispatchHandle::new("s"))
            .await
            .unwrap();

        let core = {
            let handlers = handlers.clone();
            tokio::spawn(async move { handlers.on_success(Track::Core, REPO).await })
        };
        let secondary = {
            let handlers = handlers.clone();
            tokio::spawn(async move { handlers.on_success(Track::Secondary, REPO).await })
        };
        core.await.unwrap().unwrap();
        secondary.await.unwrap().unwrap();

        let status = store.get(repo.repo_id).await.unwrap();
        assert_eq!(status.core.status, CollectionState::Success);
        assert_eq!(status.secondary.status, CollectionState::Success);
        assert_eq!(status.core.task_handle, None);
        assert_eq!(status.secondary.task_handle, None);
    }
}
