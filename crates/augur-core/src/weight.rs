//! Collection priority.
//!
//! `weight = (open issues + open PRs) - days³ / 25`
//!
//! The decay term is subtracted, so a repository left alone for longer ranks
//! lower, not higher.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::{Error, Result};

/// Source of open issue and pull request counts.
#[async_trait]
pub trait ActivityCounter: Send + Sync {
    async fn issue_and_pr_count(&self, owner: &str, name: &str) -> Result<u64>;
}

pub fn date_weight_factor(days_since_last_collection: f64) -> f64 {
    days_since_last_collection.powi(3) / 25.0
}

pub fn weight_by_issue(issue_and_pr_count: u64, days_since_last_collection: f64) -> f64 {
    issue_and_pr_count as f64 - date_weight_factor(days_since_last_collection)
}

/// Whole days elapsed since `last`; a never-collected track counts as zero.
pub fn days_since_last_collection(last: Option<NaiveDateTime>, now: NaiveDateTime) -> f64 {
    match last {
        Some(last) => (now - last).num_days().max(0) as f64,
        None => 0.0,
    }
}

/// Splits `https://github.com/<owner>/<name>[.git]` into `(owner, name)`.
pub fn owner_repo(repo_git: &str) -> Result<(String, String)> {
    let path = repo_git
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(repo_git);

    let mut segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    // host, owner, name
    if segments.len() < 3 {
        return Err(Error::InvalidRepoGit(repo_git.to_string()));
    }

    let name = segments.pop().unwrap_or_default();
    let owner = segments.pop().unwrap_or_default();
    let name = name.strip_suffix(".git").unwrap_or(name);

    if owner.is_empty() || name.is_empty() {
        return Err(Error::InvalidRepoGit(repo_git.to_string()));
    }

    Ok((owner.to_string(), name.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedRepo {
    pub repo_git: String,
    pub weight: f64,
}

/// Orders by descending weight; equal weights fall back to ascending
/// `repo_git` so the result never depends on input order.
pub fn rank(mut candidates: Vec<RankedRepo>) -> Vec<RankedRepo> {
    candidates.sort_by(|a, b| match b.weight.total_cmp(&a.weight) {
        Ordering::Equal => a.repo_git.cmp(&b.repo_git),
        other => other,
    });
    candidates
}

#[derive(Clone)]
pub struct WeightEstimator {
    counter: Arc<dyn ActivityCounter>,
}

impl WeightEstimator {
    pub fn new(counter: Arc<dyn ActivityCounter>) -> Self {
        Self { counter }
    }

    pub async fn weight_by_issue(&self, repo_git: &str, days_since_last_collection: f64) -> Result<f64> {
        let (owner, name) = owner_repo(repo_git)?;
        let count = self.counter.issue_and_pr_count(&owner, &name).await?;
        Ok(weight_by_issue(count, days_since_last_collection))
    }

    /// Weighs every candidate and returns them ranked. A candidate whose
    /// activity cannot be fetched is kept with weight `-inf`, so it ranks
    /// after every weighed candidate and its chain reports the fault.
    pub async fn rank_candidates(
        &self,
        candidates: &[(String, Option<NaiveDateTime>)],
        now: NaiveDateTime,
    ) -> Vec<RankedRepo> {
        let mut ranked = Vec::with_capacity(candidates.len());

        for (repo_git, last_collected) in candidates {
            let days = days_since_last_collection(*last_collected, now);
            match self.weight_by_issue(repo_git, days).await {
                Ok(weight) => {
                    tracing::debug!("Weight of {} is {:.2} ({} days since collection)", repo_git, weight, days);
                    ranked.push(RankedRepo {
                        repo_git: repo_git.clone(),
                        weight,
                    });
                }
                Err(e) => {
                    tracing::warn!("Could not weigh {}, ranking it last: {}", repo_git, e);
                    ranked.push(RankedRepo {
                        repo_git: repo_git.clone(),
                        weight: f64::NEG_INFINITY,
                    });
                }
            }
        }

        rank(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::parse_timestamp;
    use std::collections::HashMap;

    struct FixedCounts(HashMap<String, u64>);

    #[async_trait]
    impl ActivityCounter for FixedCounts {
        async fn issue_and_pr_count(&self, owner: &str, name: &str) -> Result<u64> {
            self.0
                .get(&format!("{}/{}", owner, name))
                .copied()
                .ok_or_else(|| Error::Activity(format!("no data for {}/{}", owner, name)))
        }
    }

    #[test]
    fn test_weight_values() {
        assert_eq!(weight_by_issue(10, 0.0), 10.0);
        assert_eq!(weight_by_issue(10, 5.0), 5.0);
        assert_eq!(weight_by_issue(10, 10.0), -30.0);
    }

    #[test]
    fn test_staler_repos_weigh_less() {
        assert!(weight_by_issue(100, 3.0) > weight_by_issue(100, 4.0));
    }

    #[test]
    fn test_days_since_last_collection() {
        let now = parse_timestamp("2024-05-11 12:00:00").unwrap();
        let last = parse_timestamp("2024-05-01 18:00:00");
        assert_eq!(days_since_last_collection(last, now), 9.0);
        assert_eq!(days_since_last_collection(None, now), 0.0);

        let future = parse_timestamp("2024-06-01 00:00:00");
        assert_eq!(days_since_last_collection(future, now), 0.0);
    }

    #[test]
    fn test_owner_repo() {
        assert_eq!(
            owner_repo("https://github.com/chaoss/augur").unwrap(),
            ("chaoss".to_string(), "augur".to_string())
        );
        assert_eq!(
            owner_repo("https://github.com/chaoss/augur.git/").unwrap(),
            ("chaoss".to_string(), "augur".to_string())
        );
        assert!(matches!(
            owner_repo("https://github.com/chaoss"),
            Err(Error::InvalidRepoGit(_))
        ));
    }

    #[test]
    fn test_rank_breaks_ties_by_repo_git() {
        let ranked = rank(vec![
            RankedRepo { repo_git: "c".into(), weight: 1.0 },
            RankedRepo { repo_git: "b".into(), weight: 5.0 },
            RankedRepo { repo_git: "a".into(), weight: 1.0 },
        ]);
        let order: Vec<&str> = ranked.iter().map(|r| r.repo_git.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_rank_candidates_keeps_failed_lookups_last() {
        let counts = HashMap::from([
            ("org/busy".to_string(), 50),
            ("org/quiet".to_string(), 10),
        ]);
        let estimator = WeightEstimator::new(Arc::new(FixedCounts(counts)));
        let now = parse_timestamp("2024-05-11 00:00:00").unwrap();

        let ranked = estimator
            .rank_candidates(
                &[
                    ("https://github.com/org/quiet".to_string(), None),
                    ("https://github.com/org/busy".to_string(), parse_timestamp("2024-05-01 00:00:00")),
                    ("https://github.com/org/unknown".to_string(), None),
                    ("https://github.com/org/gone".to_string(), None),
                ],
                now,
            )
            .await;

        // busy: 50 - 1000/25 = 10, quiet: 10 - 0 = 10; tie broken lexically
        // unweighable ones follow, also lexically
        let order: Vec<&str> = ranked.iter().map(|r| r.repo_git.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "https://github.com/org/busy",
                "https://github.com/org/quiet",
                "https://github.com/org/gone",
                "https://github.com/org/unknown",
            ]
        );
        assert_eq!(ranked[0].weight, 10.0);
        assert_eq!(ranked[3].weight, f64::NEG_INFINITY);
    }
}
