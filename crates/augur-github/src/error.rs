use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("GitHub API error: {0}")]
    ApiError(String),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Octocrab error: {0}")]
    Octocrab(#[from] octocrab::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for augur_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::RepoNotFound(name) => augur_core::Error::RepoNotFound(name),
            other => augur_core::Error::Activity(other.to_string()),
        }
    }
}
