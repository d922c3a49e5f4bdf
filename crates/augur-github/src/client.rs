use crate::{Error, Repository, Result};
use async_trait::async_trait;
use augur_core::ActivityCounter;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use serde_json::json;

const OPEN_ACTIVITY_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    issues(states: OPEN) { totalCount }
    pullRequests(states: OPEN) { totalCount }
  }
}
"#;

#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    pub fn new(token: String) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token)
            .build()?;

        Ok(Self { client })
    }

    /// Point the client at another API root (GitHub Enterprise, test servers)
    pub fn with_base_uri(token: String, base_uri: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .base_uri(base_uri)?
            .personal_token(token)
            .build()?;

        Ok(Self { client })
    }

    /// Open issue and pull request totals for a repository
    pub async fn open_activity(&self, repo: &Repository) -> Result<OpenActivity> {
        tracing::debug!("Fetching open issue/PR counts for {}", repo);

        let response: serde_json::Value = self
            .client
            .graphql(&json!({
                "query": OPEN_ACTIVITY_QUERY,
                "variables": { "owner": repo.owner, "name": repo.name },
            }))
            .await?;

        if let Some(errors) = response.get("errors").filter(|e| !e.is_null()) {
            return Err(Error::ApiError(format!("{}: {}", repo, errors)));
        }

        let repository = response
            .pointer("/data/repository")
            .filter(|r| !r.is_null())
            .ok_or_else(|| Error::RepoNotFound(repo.full_name()))?;

        let activity = serde_json::from_value::<ActivityResponse>(repository.clone())?;

        Ok(OpenActivity {
            open_issues: activity.issues.total_count,
            open_pull_requests: activity.pull_requests.total_count,
        })
    }
}

#[async_trait]
impl ActivityCounter for GitHubClient {
    async fn issue_and_pr_count(&self, owner: &str, name: &str) -> augur_core::Result<u64> {
        let repo = Repository::new(owner.to_string(), name.to_string());
        let activity = self.open_activity(&repo).await?;
        Ok(activity.total())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenActivity {
    pub open_issues: u64,
    pub open_pull_requests: u64,
}

impl OpenActivity {
    pub fn total(&self) -> u64 {
        self.open_issues + self.open_pull_requests
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityResponse {
    issues: TotalCount,
    pull_requests: TotalCount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TotalCount {
    total_count: u64,
}
