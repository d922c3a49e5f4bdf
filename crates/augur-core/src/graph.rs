//! Job graph contract between the orchestrator and an execution backend.
//!
//! A graph is an ordered list of steps for one repository. A backend runs the
//! steps strictly in order, stops at the first failure and reports that
//! failure once to the sink registered at submission.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::status::Track;
use crate::Result;

/// Opaque identifier of an in-flight chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchHandle(String);

impl DispatchHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DispatchHandle> for String {
    fn from(handle: DispatchHandle) -> Self {
        handle.0
    }
}

/// One unit of work inside a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub phase: String,
    pub repo_git: String,
    pub track: Track,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl TaskDescription {
    pub fn new(phase: impl Into<String>, repo_git: impl Into<String>, track: Track) -> Self {
        Self {
            phase: phase.into(),
            repo_git: repo_git.into(),
            track,
            args: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobGraph {
    pub repo_git: String,
    pub steps: Vec<TaskDescription>,
}

impl JobGraph {
    pub fn chain(repo_git: impl Into<String>, steps: Vec<TaskDescription>) -> Self {
        Self {
            repo_git: repo_git.into(),
            steps,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkageError {
    /// The failing work was not part of a chain. Nothing to truncate.
    #[error("task is not part of a chain")]
    NotChained,

    #[error("could not truncate chain: {0}")]
    Failed(String),
}

/// Handle on the not-yet-started remainder of a failing chain.
pub trait ChainControl: Send + Sync {
    /// Drops every step that has not started; returns how many were dropped.
    fn truncate(&self) -> std::result::Result<usize, LinkageError>;
}

/// Failure report delivered to a [`FailureSink`].
#[derive(Clone)]
pub struct ChainFailure {
    pub handle: DispatchHandle,
    pub error: String,
    pub trace: String,
    pub control: Option<Arc<dyn ChainControl>>,
}

impl fmt::Debug for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainFailure")
            .field("handle", &self.handle)
            .field("error", &self.error)
            .field("trace", &self.trace)
            .field("chained", &self.control.is_some())
            .finish()
    }
}

/// Receives the first unrecovered failure of a chain. Must not fail itself.
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn on_failure(&self, failure: ChainFailure);
}

/// Any backend able to run a [`JobGraph`].
pub trait ExecutionEngine: Send + Sync {
    /// Accepts the graph and returns at once. The sink is called at most once
    /// for the whole graph.
    fn submit(&self, graph: JobGraph, sink: Arc<dyn FailureSink>) -> Result<DispatchHandle>;
}
