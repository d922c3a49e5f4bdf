use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("No runner registered for phase: {0}")]
    UnknownPhase(String),

    #[error("Phase {phase} failed for {repo_git}: {reason}")]
    PhaseFailed {
        phase: String,
        repo_git: String,
        reason: String,
    },

    #[error(transparent)]
    Core(#[from] augur_core::Error),

    #[error(transparent)]
    Database(#[from] augur_db::Error),

    #[error(transparent)]
    GitHub(#[from] augur_github::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
