use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Format used for `<track>_data_last_collected` columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CollectionState {
    Pending,
    Collecting,
    Update,
    Success,
    Error,
    FailedClone,
}

impl CollectionState {
    pub const ALL: [CollectionState; 6] = [
        CollectionState::Pending,
        CollectionState::Collecting,
        CollectionState::Update,
        CollectionState::Success,
        CollectionState::Error,
        CollectionState::FailedClone,
    ];

    /// Stable string stored in the `<track>_status` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionState::Pending => "Pending",
            CollectionState::Collecting => "Collecting",
            CollectionState::Update => "Update",
            CollectionState::Success => "Success",
            CollectionState::Error => "Error",
            CollectionState::FailedClone => "Failed Clone",
        }
    }
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectionState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownState(s.to_string()))
    }
}

impl TryFrom<String> for CollectionState {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        value.parse()
    }
}

impl From<CollectionState> for String {
    fn from(state: CollectionState) -> Self {
        state.as_str().to_string()
    }
}

/// One of the three independent collection pipelines of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Core,
    Secondary,
    Facade,
}

impl Track {
    pub const ALL: [Track; 3] = [Track::Core, Track::Secondary, Track::Facade];

    /// Column prefix in the persisted schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Core => "core",
            Track::Secondary => "secondary",
            Track::Facade => "facade",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Track {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "core" => Ok(Track::Core),
            "secondary" => Ok(Track::Secondary),
            "facade" => Ok(Track::Facade),
            _ => Err(Error::UnknownTrack(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStatus {
    pub status: CollectionState,
    pub task_handle: Option<String>,
    pub last_collected_at: Option<NaiveDateTime>,
}

impl TrackStatus {
    pub fn pending() -> Self {
        Self {
            status: CollectionState::Pending,
            task_handle: None,
            last_collected_at: None,
        }
    }
}

impl Default for TrackStatus {
    fn default() -> Self {
        Self::pending()
    }
}

/// Per-repository collection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub repo_id: i64,
    pub core: TrackStatus,
    pub secondary: TrackStatus,
    pub facade: TrackStatus,
}

impl CollectionStatus {
    pub fn new(repo_id: i64) -> Self {
        Self {
            repo_id,
            core: TrackStatus::pending(),
            secondary: TrackStatus::pending(),
            facade: TrackStatus::pending(),
        }
    }

    pub fn track(&self, track: Track) -> &TrackStatus {
        match track {
            Track::Core => &self.core,
            Track::Secondary => &self.secondary,
            Track::Facade => &self.facade,
        }
    }

    pub fn track_mut(&mut self, track: Track) -> &mut TrackStatus {
        match track {
            Track::Core => &mut self.core,
            Track::Secondary => &mut self.secondary,
            Track::Facade => &mut self.facade,
        }
    }

    /// Tracks whose in-flight handle equals `handle`.
    pub fn tracks_with_handle(&self, handle: &str) -> Vec<Track> {
        Track::ALL
            .into_iter()
            .filter(|t| self.track(*t).task_handle.as_deref() == Some(handle))
            .collect()
    }
}

/// Field values written by a single `set_track` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackUpdate {
    pub status: CollectionState,
    pub task_handle: Option<String>,
    pub last_collected_at: Option<NaiveDateTime>,
}

impl TrackUpdate {
    pub fn new(status: CollectionState) -> Self {
        Self {
            status,
            task_handle: None,
            last_collected_at: None,
        }
    }

    pub fn with_task_handle(mut self, handle: impl Into<String>) -> Self {
        self.task_handle = Some(handle.into());
        self
    }

    pub fn with_last_collected_at(mut self, at: NaiveDateTime) -> Self {
        self.last_collected_at = Some(at);
        self
    }

    /// Applies the update. `last_collected_at` is only overwritten when set.
    pub fn apply(&self, track: &mut TrackStatus) {
        track.status = self.status;
        track.task_handle = self.task_handle.clone();
        if let Some(at) = self.last_collected_at {
            track.last_collected_at = Some(at);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub repo_id: i64,
    pub repo_git: String,
}

impl Repository {
    pub fn new(repo_id: i64, repo_git: impl Into<String>) -> Self {
        Self {
            repo_id,
            repo_git: repo_git.into(),
        }
    }
}

/// Current UTC time truncated to whole seconds, matching the stored format.
pub fn now_timestamp() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_timestamp(at: &NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_strings() {
        assert_eq!(CollectionState::FailedClone.as_str(), "Failed Clone");
        assert_eq!(
            "Failed Clone".parse::<CollectionState>().unwrap(),
            CollectionState::FailedClone
        );
        assert_eq!(
            serde_json::to_string(&CollectionState::Success).unwrap(),
            "\"Success\""
        );
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let err = "success".parse::<CollectionState>().unwrap_err();
        assert!(matches!(err, Error::UnknownState(s) if s == "success"));
    }

    #[test]
    fn test_new_status_is_all_pending() {
        let status = CollectionStatus::new(7);
        for track in Track::ALL {
            assert_eq!(status.track(track), &TrackStatus::pending());
        }
    }

    #[test]
    fn test_tracks_with_handle() {
        let mut status = CollectionStatus::new(1);
        status.core.task_handle = Some("abc".to_string());
        status.facade.task_handle = Some("abc".to_string());
        status.secondary.task_handle = Some("other".to_string());

        assert_eq!(status.tracks_with_handle("abc"), vec![Track::Core, Track::Facade]);
        assert!(status.tracks_with_handle("missing").is_empty());
    }

    #[test]
    fn test_update_keeps_last_collected_when_unset() {
        let at = parse_timestamp("2024-03-01 10:00:00").unwrap();
        let mut track = TrackStatus {
            status: CollectionState::Success,
            task_handle: Some("h".to_string()),
            last_collected_at: Some(at),
        };

        TrackUpdate::new(CollectionState::Error).apply(&mut track);

        assert_eq!(track.status, CollectionState::Error);
        assert_eq!(track.task_handle, None);
        assert_eq!(track.last_collected_at, Some(at));
    }

    #[test]
    fn test_timestamp_format() {
        let at = parse_timestamp("2023-12-31 23:59:58").unwrap();
        assert_eq!(format_timestamp(&at), "2023-12-31 23:59:58");
        assert!(parse_timestamp("2023-12-31T23:59:58").is_none());
    }
}
