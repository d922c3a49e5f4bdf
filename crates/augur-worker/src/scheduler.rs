use augur_core::{
    CollectionRoutine, CollectionState, DispatchHandle, OutcomeHandlers, RankedRepo, RepoLookup,
    StatusFilter, StatusStore, Track, WeightEstimator,
};
use chrono::NaiveDateTime;
use futures_util::{pin_mut, StreamExt};
use std::sync::Arc;

use crate::config::CollectionSection;
use crate::engine::TokioEngine;
use crate::Result;

/// Picks repositories due for collection on one track and dispatches them.
pub struct CollectionScheduler {
    store: Arc<dyn StatusStore>,
    repos: Arc<dyn RepoLookup>,
    outcomes: OutcomeHandlers,
    routine: CollectionRoutine,
    engine: TokioEngine,
    estimator: Option<WeightEstimator>,
    settings: CollectionSection,
}

impl CollectionScheduler {
    pub fn new(
        store: Arc<dyn StatusStore>,
        repos: Arc<dyn RepoLookup>,
        routine: CollectionRoutine,
        engine: TokioEngine,
        settings: CollectionSection,
    ) -> Self {
        let outcomes = OutcomeHandlers::new(store.clone(), repos.clone());
        Self {
            store,
            repos,
            outcomes,
            routine,
            engine,
            estimator: None,
            settings,
        }
    }

    /// Rank candidates by activity instead of taking them in store order.
    pub fn with_estimator(mut self, estimator: WeightEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn engine(&self) -> &TokioEngine {
        &self.engine
    }

    pub fn track(&self) -> Track {
        self.settings.track
    }

    /// Tracks that were never collected, or collected successfully before the
    /// recollection cutoff. Secondary and facade wait for core to succeed.
    pub fn candidate_filter(&self, now: NaiveDateTime) -> StatusFilter {
        let track = self.settings.track;
        let cutoff = now - chrono::Duration::days(self.settings.recollect_after_days);

        let stale = StatusFilter::state(track, CollectionState::Success).and(
            StatusFilter::CollectedBefore(track, cutoff).or(StatusFilter::NeverCollected(track)),
        );
        let due = StatusFilter::state(track, CollectionState::Pending).or(stale);

        match track {
            Track::Core => due,
            _ => due.and(StatusFilter::state(Track::Core, CollectionState::Success)),
        }
    }

    /// Candidates for this pass, best first.
    pub async fn plan(&self, now: NaiveDateTime) -> Result<Vec<RankedRepo>> {
        let track = self.settings.track;
        let found = self
            .store
            .find(&self.candidate_filter(now), self.settings.batch_limit)
            .await?;

        let mut candidates = Vec::with_capacity(found.len());
        for repo_git in found {
            let repo = match self.repos.find_by_location(&repo_git).await {
                Ok(Some(repo)) => repo,
                Ok(None) => {
                    tracing::warn!("Status row for {} has no repository, skipping", repo_git);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Could not resolve {}: {}", repo_git, e);
                    continue;
                }
            };

            match self.store.get(repo.repo_id).await {
                Ok(status) => candidates.push((repo_git, status.track(track).last_collected_at)),
                Err(e) => tracing::warn!("Could not load status of {}: {}", repo_git, e),
            }
        }

        let ranked = match &self.estimator {
            Some(estimator) => estimator.rank_candidates(&candidates, now).await,
            None => candidates
                .into_iter()
                .map(|(repo_git, _)| RankedRepo {
                    repo_git,
                    weight: 0.0,
                })
                .collect(),
        };

        Ok(ranked)
    }

    /// Dispatches one chain per planned repository and marks each track
    /// `Collecting` with its handle.
    pub async fn run_pass(&self, now: NaiveDateTime) -> Result<Vec<(String, DispatchHandle)>> {
        let plan = self.plan(now).await?;
        if plan.is_empty() {
            tracing::debug!("No repositories due for {} collection", self.settings.track);
            return Ok(Vec::new());
        }

        tracing::info!(
            "Starting {} collection for {} repositories",
            self.settings.track,
            plan.len()
        );

        // Chains must not settle before their dispatch is recorded.
        let hold = self.engine.hold_starts().await;

        let dispatched = self
            .routine
            .start_collection(plan.into_iter().map(|r| r.repo_git).collect());
        pin_mut!(dispatched);

        let mut started = Vec::new();
        while let Some((repo_git, handle)) = dispatched.next().await {
            if let Err(e) = self
                .outcomes
                .on_dispatched(self.settings.track, &repo_git, &handle)
                .await
            {
                tracing::error!("Chain {} for {} runs untracked: {}", handle, repo_git, e);
            }
            started.push((repo_git, handle));
        }

        drop(hold);
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PhaseRunners;
    use augur_core::status::{parse_timestamp, TrackStatus};
    use augur_core::{CollectionStatus, InMemoryStore, PhaseRegistry};

    fn scheduler(store: &InMemoryStore, track: Track) -> CollectionScheduler {
        let shared = Arc::new(store.clone());
        let outcomes = OutcomeHandlers::new(shared.clone(), shared.clone());
        let engine = TokioEngine::new(PhaseRunners::new(), outcomes.clone(), 1);
        let routine = CollectionRoutine::new(
            PhaseRegistry::new(),
            shared.clone(),
            Arc::new(engine.clone()),
            Arc::new(outcomes),
        );
        let settings = CollectionSection {
            track,
            ..CollectionSection::default()
        };
        CollectionScheduler::new(shared.clone(), shared, routine, engine, settings)
    }

    fn status(core: CollectionState, last: Option<&str>) -> CollectionStatus {
        let mut status = CollectionStatus::new(1);
        status.core = TrackStatus {
            status: core,
            task_handle: None,
            last_collected_at: last.and_then(parse_timestamp),
        };
        status
    }

    #[tokio::test]
    async fn test_candidate_filter_core() {
        let store = InMemoryStore::new();
        let scheduler = scheduler(&store, Track::Core);
        let now = parse_timestamp("2024-03-10 12:00:00").unwrap();
        let filter = scheduler.candidate_filter(now);

        assert!(filter.matches(&status(CollectionState::Pending, None)));
        assert!(filter.matches(&status(CollectionState::Success, Some("2024-03-01 00:00:00"))));
        assert!(!filter.matches(&status(CollectionState::Success, Some("2024-03-10 06:00:00"))));
        assert!(!filter.matches(&status(CollectionState::Collecting, None)));
        assert!(!filter.matches(&status(CollectionState::Error, None)));
    }

    #[tokio::test]
    async fn test_secondary_waits_for_core() {
        let store = InMemoryStore::new();
        let scheduler = scheduler(&store, Track::Secondary);
        let now = parse_timestamp("2024-03-10 12:00:00").unwrap();
        let filter = scheduler.candidate_filter(now);

        assert!(!filter.matches(&status(CollectionState::Pending, None)));
        assert!(filter.matches(&status(CollectionState::Success, Some("2024-03-10 06:00:00"))));
    }

    #[tokio::test]
    async fn test_plan_respects_batch_limit() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.add_repository(&format!("https://github.com/o/r{}", i)).await;
        }
        let mut scheduler = scheduler(&store, Track::Core);
        scheduler.settings.batch_limit = 3;

        let plan = scheduler
            .plan(parse_timestamp("2024-03-10 12:00:00").unwrap())
            .await
            .unwrap();

        let names: Vec<_> = plan.iter().map(|r| r.repo_git.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "https://github.com/o/r0",
                "https://github.com/o/r1",
                "https://github.com/o/r2"
            ]
        );
    }
}
