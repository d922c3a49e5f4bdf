use async_trait::async_trait;
use augur_core::{
    ChainControl, ChainFailure, DispatchHandle, ExecutionEngine, FailureSink, JobGraph,
    LinkageError, OutcomeHandlers, TaskDescription,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Executes one step of a chain. Looked up by the step's phase name.
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    async fn run(&self, task: &TaskDescription) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct PhaseRunners {
    runners: HashMap<String, Arc<dyn PhaseRunner>>,
}

impl PhaseRunners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, phase: impl Into<String>, runner: Arc<dyn PhaseRunner>) -> Self {
        self.runners.insert(phase.into(), runner);
        self
    }

    pub fn get(&self, phase: &str) -> Option<&Arc<dyn PhaseRunner>> {
        self.runners.get(phase)
    }
}

/// Steps of a running chain that have not started yet.
struct PendingSteps {
    steps: Mutex<VecDeque<TaskDescription>>,
}

impl PendingSteps {
    fn new(steps: Vec<TaskDescription>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
        }
    }

    fn next(&self) -> Option<TaskDescription> {
        match self.steps.lock() {
            Ok(mut steps) => steps.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

impl ChainControl for PendingSteps {
    fn truncate(&self) -> std::result::Result<usize, LinkageError> {
        let mut steps = self
            .steps
            .lock()
            .map_err(|e| LinkageError::Failed(e.to_string()))?;
        let dropped = steps.len();
        steps.clear();
        Ok(dropped)
    }
}

/// In-process execution engine on the tokio runtime.
///
/// Each submitted chain runs as one spawned task, steps strictly in order.
/// At most `max_concurrent_chains` chains execute at the same time; the rest
/// wait for a permit.
#[derive(Clone)]
pub struct TokioEngine {
    runners: Arc<PhaseRunners>,
    outcomes: OutcomeHandlers,
    permits: Arc<Semaphore>,
    gate: Arc<RwLock<()>>,
    chains: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TokioEngine {
    pub fn new(runners: PhaseRunners, outcomes: OutcomeHandlers, max_concurrent_chains: usize) -> Self {
        Self {
            runners: Arc::new(runners),
            outcomes,
            permits: Arc::new(Semaphore::new(max_concurrent_chains.max(1))),
            gate: Arc::new(RwLock::new(())),
            chains: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Chains submitted while the returned guard is alive do not start
    /// their first step until it is dropped.
    pub async fn hold_starts(&self) -> OwnedRwLockWriteGuard<()> {
        self.gate.clone().write_owned().await
    }

    /// Waits for every submitted chain, including ones submitted meanwhile.
    pub async fn wait_idle(&self) {
        loop {
            let pending = match self.chains.lock() {
                Ok(mut chains) => std::mem::take(&mut *chains),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            if pending.is_empty() {
                break;
            }

            for chain in pending {
                if let Err(e) = chain.await {
                    tracing::error!("Chain task aborted: {}", e);
                }
            }
        }
    }
}

impl ExecutionEngine for TokioEngine {
    fn submit(&self, graph: JobGraph, sink: Arc<dyn FailureSink>) -> augur_core::Result<DispatchHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| augur_core::Error::Submit(e.to_string()))?;

        let handle = DispatchHandle::new(uuid::Uuid::new_v4().to_string());
        let run = ChainRun {
            handle: handle.clone(),
            repo_git: graph.repo_git,
            chained: graph.steps.len() > 1,
            steps: Arc::new(PendingSteps::new(graph.steps)),
            runners: self.runners.clone(),
            outcomes: self.outcomes.clone(),
            sink,
        };

        let permits = self.permits.clone();
        let gate = self.gate.clone();
        let task = runtime.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!("Chain {} not started: {}", run.handle, e);
                    return;
                }
            };
            drop(gate.read().await);
            run.execute().await;
        });

        let mut chains = self
            .chains
            .lock()
            .map_err(|e| augur_core::Error::Submit(e.to_string()))?;
        chains.retain(|chain| !chain.is_finished());
        chains.push(task);

        Ok(handle)
    }
}

struct ChainRun {
    handle: DispatchHandle,
    repo_git: String,
    chained: bool,
    steps: Arc<PendingSteps>,
    runners: Arc<PhaseRunners>,
    outcomes: OutcomeHandlers,
    sink: Arc<dyn FailureSink>,
}

impl ChainRun {
    async fn execute(self) {
        tracing::debug!("Chain {} started for {}", self.handle, self.repo_git);
        let mut reported = false;

        while let Some(task) = self.steps.next() {
            match self.outcomes.should_skip(task.track, &task.repo_git).await {
                Ok(true) => {
                    tracing::debug!(
                        "Skipping phase {} for {}: {} track is in error",
                        task.phase,
                        task.repo_git,
                        task.track
                    );
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Skip check failed for {}, running phase {}: {}", task.repo_git, task.phase, e);
                }
            }

            let result = match self.runners.get(&task.phase) {
                Some(runner) => runner.run(&task).await,
                None => Err(Error::UnknownPhase(task.phase.clone())),
            };

            let Err(e) = result else { continue };

            tracing::error!("Phase {} failed in chain {}: {}", task.phase, self.handle, e);
            if reported {
                continue;
            }
            reported = true;

            let control = self
                .chained
                .then(|| self.steps.clone() as Arc<dyn ChainControl>);
            self.sink
                .on_failure(ChainFailure {
                    handle: self.handle.clone(),
                    error: e.to_string(),
                    trace: format!("{:?}", e),
                    control,
                })
                .await;
        }

        tracing::debug!("Chain {} finished for {}", self.handle, self.repo_git);
    }
}
