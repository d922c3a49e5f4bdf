use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::graph::TaskDescription;

/// Builds the task description of one phase for a repository.
pub type PhaseJob = Arc<dyn Fn(&str) -> TaskDescription + Send + Sync>;

/// Ordered `(phase name, constructor)` pairs. Chains are assembled in
/// registration order, never by name.
#[derive(Clone, Default)]
pub struct PhaseRegistry {
    phases: Vec<(String, PhaseJob)>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase<F>(mut self, name: impl Into<String>, job: F) -> Self
    where
        F: Fn(&str) -> TaskDescription + Send + Sync + 'static,
    {
        self.set(name, Arc::new(job));
        self
    }

    pub fn get(&self, name: &str) -> Option<&PhaseJob> {
        self.phases
            .iter()
            .find(|(phase, _)| phase == name)
            .map(|(_, job)| job)
    }

    /// Appends a phase, or replaces the constructor of an existing one in place.
    pub fn set(&mut self, name: impl Into<String>, job: PhaseJob) {
        let name = name.into();
        match self.phases.iter_mut().find(|(phase, _)| *phase == name) {
            Some((_, existing)) => *existing = job,
            None => self.phases.push((name, job)),
        }
    }

    /// Keeps only phases explicitly enabled in `enabled`.
    pub fn retain_enabled(&mut self, enabled: &HashMap<String, bool>) {
        self.phases.retain(|(name, _)| {
            let keep = enabled.get(name).copied().unwrap_or(false);
            if !keep {
                tracing::info!("Phase {} is disabled by configuration", name);
            }
            keep
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Task descriptions for `repo_git`, in registration order.
    pub fn build(&self, repo_git: &str) -> Vec<TaskDescription> {
        self.phases
            .iter()
            .map(|(name, job)| {
                tracing::info!("Queuing phase {} for repo {}", name, repo_git);
                job(repo_git)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

impl fmt::Debug for PhaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Track;

    fn phase(name: &'static str) -> impl Fn(&str) -> TaskDescription + Send + Sync + 'static {
        move |repo_git: &str| TaskDescription::new(name, repo_git, Track::Core)
    }

    #[test]
    fn test_build_follows_registration_order() {
        let registry = PhaseRegistry::new()
            .with_phase("zeta", phase("zeta"))
            .with_phase("alpha", phase("alpha"));

        let steps = registry.build("https://github.com/org/r");
        let names: Vec<&str> = steps.iter().map(|s| s.phase.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(steps.iter().all(|s| s.repo_git == "https://github.com/org/r"));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut registry = PhaseRegistry::new()
            .with_phase("prelim", phase("prelim"))
            .with_phase("primary", phase("primary"));

        registry.set("prelim", Arc::new(phase("prelim-v2")));
        registry.set("facade", Arc::new(phase("facade")));

        assert_eq!(registry.names(), vec!["prelim", "primary", "facade"]);
        let job = registry.get("prelim").unwrap();
        assert_eq!(job("r").phase, "prelim-v2");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_retain_enabled() {
        let mut registry = PhaseRegistry::new()
            .with_phase("prelim", phase("prelim"))
            .with_phase("primary", phase("primary"))
            .with_phase("facade", phase("facade"));

        let enabled = HashMap::from([
            ("prelim".to_string(), true),
            ("primary".to_string(), false),
        ]);
        registry.retain_enabled(&enabled);

        assert_eq!(registry.names(), vec!["prelim"]);
    }
}
