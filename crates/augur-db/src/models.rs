use augur_core::status::parse_timestamp;
use augur_core::{CollectionState, CollectionStatus, Repository, TrackStatus};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RepoRecord {
    pub repo_id: i64,
    pub repo_git: String,
}

impl From<RepoRecord> for Repository {
    fn from(record: RepoRecord) -> Self {
        Repository::new(record.repo_id, record.repo_git)
    }
}

/// Raw `collection_status` row. Status and timestamp columns are text.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CollectionStatusRecord {
    pub repo_id: i64,
    pub core_status: String,
    pub core_task_id: Option<String>,
    pub core_data_last_collected: Option<String>,
    pub secondary_status: String,
    pub secondary_task_id: Option<String>,
    pub secondary_data_last_collected: Option<String>,
    pub facade_status: String,
    pub facade_task_id: Option<String>,
    pub facade_data_last_collected: Option<String>,
}

fn track_status(
    repo_id: i64,
    status: &str,
    task_id: Option<String>,
    last_collected: Option<String>,
) -> Result<TrackStatus, Error> {
    let status = status
        .parse::<CollectionState>()
        .map_err(|e| Error::InvalidRecord {
            repo_id,
            reason: e.to_string(),
        })?;

    let last_collected_at = match last_collected {
        Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| Error::InvalidRecord {
            repo_id,
            reason: format!("unparseable timestamp '{}'", raw),
        })?),
        None => None,
    };

    Ok(TrackStatus {
        status,
        task_handle: task_id,
        last_collected_at,
    })
}

impl TryFrom<CollectionStatusRecord> for CollectionStatus {
    type Error = Error;

    fn try_from(record: CollectionStatusRecord) -> Result<Self, Self::Error> {
        let repo_id = record.repo_id;
        Ok(CollectionStatus {
            repo_id,
            core: track_status(
                repo_id,
                &record.core_status,
                record.core_task_id,
                record.core_data_last_collected,
            )?,
            secondary: track_status(
                repo_id,
                &record.secondary_status,
                record.secondary_task_id,
                record.secondary_data_last_collected,
            )?,
            facade: track_status(
                repo_id,
                &record.facade_status,
                record.facade_task_id,
                record.facade_data_last_collected,
            )?,
        })
    }
}
