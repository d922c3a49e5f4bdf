use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::status::{CollectionState, CollectionStatus, Repository, Track, TrackUpdate};
use crate::Result;

/// Selection predicate over collection status rows.
///
/// Kept as data so that each backend can evaluate it natively: the in-memory
/// store calls [`StatusFilter::matches`], the Postgres store renders SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusFilter {
    State(Track, CollectionState),
    TaskHandle(Track, String),
    NeverCollected(Track),
    CollectedBefore(Track, NaiveDateTime),
    Any(Vec<StatusFilter>),
    All(Vec<StatusFilter>),
    Not(Box<StatusFilter>),
}

impl StatusFilter {
    pub fn state(track: Track, state: CollectionState) -> Self {
        StatusFilter::State(track, state)
    }

    pub fn and(self, other: StatusFilter) -> Self {
        match self {
            StatusFilter::All(mut filters) => {
                filters.push(other);
                StatusFilter::All(filters)
            }
            first => StatusFilter::All(vec![first, other]),
        }
    }

    pub fn or(self, other: StatusFilter) -> Self {
        match self {
            StatusFilter::Any(mut filters) => {
                filters.push(other);
                StatusFilter::Any(filters)
            }
            first => StatusFilter::Any(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        StatusFilter::Not(Box::new(self))
    }

    pub fn matches(&self, status: &CollectionStatus) -> bool {
        match self {
            StatusFilter::State(track, state) => status.track(*track).status == *state,
            StatusFilter::TaskHandle(track, handle) => {
                status.track(*track).task_handle.as_deref() == Some(handle.as_str())
            }
            StatusFilter::NeverCollected(track) => status.track(*track).last_collected_at.is_none(),
            StatusFilter::CollectedBefore(track, cutoff) => status
                .track(*track)
                .last_collected_at
                .map(|at| at < *cutoff)
                .unwrap_or(false),
            StatusFilter::Any(filters) => filters.iter().any(|f| f.matches(status)),
            StatusFilter::All(filters) => filters.iter().all(|f| f.matches(status)),
            StatusFilter::Not(inner) => !inner.matches(status),
        }
    }
}

/// Data access for per-repository collection status. No policy lives here.
///
/// Every write touches the columns of exactly one track inside its own
/// transaction, so writers targeting different tracks of the same repository
/// cannot clobber each other.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Creates the all-`Pending` row for a repository; returns the existing
    /// row unchanged when one is already present.
    async fn register(&self, repo_id: i64) -> Result<CollectionStatus>;

    async fn get(&self, repo_id: i64) -> Result<CollectionStatus>;

    /// `repo_git` of rows matching `filter`, at most `limit` of them.
    async fn find(&self, filter: &StatusFilter, limit: usize) -> Result<Vec<String>>;

    async fn set_track(&self, repo_id: i64, track: Track, update: TrackUpdate) -> Result<()>;

    /// Like `set_track`, but only while the track still holds
    /// `expected_handle`. Returns whether the update was applied.
    async fn set_track_if_handle(
        &self,
        repo_id: i64,
        track: Track,
        expected_handle: &str,
        update: TrackUpdate,
    ) -> Result<bool>;

    async fn clear_task_handle(&self, repo_id: i64, track: Track) -> Result<()>;

    /// Every `(repo_id, track)` whose in-flight handle equals `handle`.
    async fn find_by_task_handle(&self, handle: &str) -> Result<Vec<(i64, Track)>>;
}

#[async_trait]
pub trait RepoLookup: Send + Sync {
    async fn find_by_location(&self, repo_git: &str) -> Result<Option<Repository>>;
}
