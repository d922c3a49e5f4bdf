//! Standard collection phases and the runners that execute them.

use async_trait::async_trait;
use augur_core::weight::owner_repo;
use augur_core::{ActivityCounter, OutcomeHandlers, PhaseJob, PhaseRegistry, RepoLookup, TaskDescription, Track};
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::{PhaseRunner, PhaseRunners};
use crate::{Error, Result};

pub const PRELIM_PHASE: &str = "prelim_phase";
pub const ACTIVITY_PHASE: &str = "activity_phase";
pub const MARK_COLLECTED: &str = "mark_collected";

/// Phases that `task_routine` can switch off. `mark_collected` always closes the chain.
pub const CONFIGURABLE_PHASES: &[&str] = &[PRELIM_PHASE, ACTIVITY_PHASE];

/// Checks that the repository is still registered and its location parses.
pub struct PrelimRunner {
    repos: Arc<dyn RepoLookup>,
}

impl PrelimRunner {
    pub fn new(repos: Arc<dyn RepoLookup>) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl PhaseRunner for PrelimRunner {
    async fn run(&self, task: &TaskDescription) -> Result<()> {
        owner_repo(&task.repo_git)?;

        if self.repos.find_by_location(&task.repo_git).await?.is_none() {
            return Err(Error::PhaseFailed {
                phase: task.phase.clone(),
                repo_git: task.repo_git.clone(),
                reason: "repository is no longer registered".to_string(),
            });
        }

        Ok(())
    }
}

/// Fetches open issue and pull request totals.
pub struct ActivityRunner {
    counter: Arc<dyn ActivityCounter>,
}

impl ActivityRunner {
    pub fn new(counter: Arc<dyn ActivityCounter>) -> Self {
        Self { counter }
    }
}

#[async_trait]
impl PhaseRunner for ActivityRunner {
    async fn run(&self, task: &TaskDescription) -> Result<()> {
        let (owner, name) = owner_repo(&task.repo_git)?;
        let count = self.counter.issue_and_pr_count(&owner, &name).await?;
        tracing::info!("{}/{} has {} open issues and pull requests", owner, name, count);
        Ok(())
    }
}

/// Last step of every chain: records the track as collected.
pub struct MarkCollectedRunner {
    outcomes: OutcomeHandlers,
}

impl MarkCollectedRunner {
    pub fn new(outcomes: OutcomeHandlers) -> Self {
        Self { outcomes }
    }
}

#[async_trait]
impl PhaseRunner for MarkCollectedRunner {
    async fn run(&self, task: &TaskDescription) -> Result<()> {
        self.outcomes.on_success(task.track, &task.repo_git).await?;
        Ok(())
    }
}

fn describe(phase: &'static str, track: Track) -> impl Fn(&str) -> TaskDescription + Send + Sync + 'static {
    move |repo_git: &str| TaskDescription::new(phase, repo_git, track)
}

/// Registry of the enabled standard phases for `track`, closed by `mark_collected`.
/// The activity phase is left out when no counter is available.
pub fn collection_phases(
    track: Track,
    enabled: &HashMap<String, bool>,
    with_activity: bool,
) -> PhaseRegistry {
    let mut registry = PhaseRegistry::new().with_phase(PRELIM_PHASE, describe(PRELIM_PHASE, track));
    if with_activity {
        registry = registry.with_phase(ACTIVITY_PHASE, describe(ACTIVITY_PHASE, track));
    } else {
        tracing::info!("No activity counter configured, {} not registered", ACTIVITY_PHASE);
    }

    registry.retain_enabled(enabled);

    let closing: PhaseJob = Arc::new(describe(MARK_COLLECTED, track));
    registry.set(MARK_COLLECTED, closing);
    registry
}

/// Runners for every standard phase.
pub fn standard_runners(
    outcomes: OutcomeHandlers,
    repos: Arc<dyn RepoLookup>,
    counter: Option<Arc<dyn ActivityCounter>>,
) -> PhaseRunners {
    let mut runners = PhaseRunners::new()
        .register(PRELIM_PHASE, Arc::new(PrelimRunner::new(repos)))
        .register(MARK_COLLECTED, Arc::new(MarkCollectedRunner::new(outcomes)));

    if let Some(counter) = counter {
        runners = runners.register(ACTIVITY_PHASE, Arc::new(ActivityRunner::new(counter)));
    }

    runners
}
