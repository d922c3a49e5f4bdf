use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Collection status not found for repo_id {0}")]
    StatusNotFound(i64),

    #[error("Invalid collection status record for repo_id {repo_id}: {reason}")]
    InvalidRecord { repo_id: i64, reason: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for augur_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::StatusNotFound(repo_id) => augur_core::Error::StatusNotFound(repo_id),
            Error::RepoNotFound(repo_git) => augur_core::Error::RepoNotFound(repo_git),
            other => augur_core::Error::Store(other.to_string()),
        }
    }
}
