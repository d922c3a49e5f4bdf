pub mod status;
pub mod store;
pub mod memory;
pub mod graph;
pub mod outcome;
pub mod weight;
pub mod phase;
pub mod orchestrator;
pub mod error;

// Re-exports
pub use status::{CollectionState, CollectionStatus, Repository, Track, TrackStatus, TrackUpdate};
pub use store::{RepoLookup, StatusFilter, StatusStore};
pub use memory::InMemoryStore;
pub use graph::{
    ChainControl, ChainFailure, DispatchHandle, ExecutionEngine, FailureSink, JobGraph,
    LinkageError, TaskDescription,
};
pub use outcome::OutcomeHandlers;
pub use weight::{ActivityCounter, RankedRepo, WeightEstimator};
pub use phase::{PhaseJob, PhaseRegistry};
pub use orchestrator::CollectionRoutine;
pub use error::{Error, Result};
