use futures_util::stream::{self, Stream};
use std::sync::Arc;

use crate::graph::{DispatchHandle, ExecutionEngine, FailureSink, JobGraph};
use crate::phase::PhaseRegistry;
use crate::store::RepoLookup;
use crate::{Error, Result};

/// Builds one phase chain per repository and hands it to the execution engine.
///
/// Chains of different repositories are independent; only the order of
/// phases inside a chain is guaranteed.
pub struct CollectionRoutine {
    phases: PhaseRegistry,
    repos: Arc<dyn RepoLookup>,
    engine: Arc<dyn ExecutionEngine>,
    sink: Arc<dyn FailureSink>,
}

impl CollectionRoutine {
    pub fn new(
        phases: PhaseRegistry,
        repos: Arc<dyn RepoLookup>,
        engine: Arc<dyn ExecutionEngine>,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            phases,
            repos,
            engine,
            sink,
        }
    }

    pub fn phases(&self) -> &PhaseRegistry {
        &self.phases
    }

    pub fn phases_mut(&mut self) -> &mut PhaseRegistry {
        &mut self.phases
    }

    /// Submits the chain for a single repository.
    pub async fn dispatch(&self, repo_git: &str) -> Result<DispatchHandle> {
        let repo = self
            .repos
            .find_by_location(repo_git)
            .await?
            .ok_or_else(|| Error::RepoNotFound(repo_git.to_string()))?;

        let graph = JobGraph::chain(repo_git, self.phases.build(repo_git));
        let handle = self.engine.submit(graph, self.sink.clone())?;

        tracing::info!(
            "Dispatched collection chain {} for repo_id {} ({})",
            handle,
            repo.repo_id,
            repo_git
        );

        Ok(handle)
    }

    /// Lazily dispatches one chain per candidate, in candidate order.
    ///
    /// Each pull submits exactly one repository's chain. A repository that
    /// cannot be resolved or submitted is logged and skipped; the sequence
    /// carries on with the next candidate. The stream is single-pass: call
    /// again to re-dispatch.
    pub fn start_collection(
        &self,
        repos: Vec<String>,
    ) -> impl Stream<Item = (String, DispatchHandle)> + '_ {
        stream::unfold(repos.into_iter(), move |mut remaining| async move {
            while let Some(repo_git) = remaining.next() {
                match self.dispatch(&repo_git).await {
                    Ok(handle) => return Some(((repo_git, handle), remaining)),
                    Err(e) => {
                        tracing::error!("Skipping collection of {}: {}", repo_git, e);
                    }
                }
            }
            None
        })
    }
}
