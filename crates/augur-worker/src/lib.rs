pub mod config;
pub mod engine;
pub mod phases;
pub mod scheduler;
pub mod error;

pub use self::config::{load_config, CollectionSection, WorkerConfig};
pub use engine::{PhaseRunner, PhaseRunners, TokioEngine};
pub use scheduler::CollectionScheduler;
pub use error::{Error, Result};
