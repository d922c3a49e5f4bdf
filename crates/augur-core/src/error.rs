use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Collection status not found for repo_id {0}")]
    StatusNotFound(i64),

    #[error("Unknown collection state: {0}")]
    UnknownState(String),

    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("Invalid repo_git (expected <host>/<owner>/<name>): {0}")]
    InvalidRepoGit(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Submission error: {0}")]
    Submit(String),

    #[error("Activity lookup error: {0}")]
    Activity(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
