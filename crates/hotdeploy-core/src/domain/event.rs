//! GitLab push hook payload.
//!
//! Only `repository.name` and `repository.url` drive deployment; the remaining
//! fields are carried for logging. Missing fields default so that hooks from
//! older GitLab versions still decode.

use serde::{Deserialize, Serialize};

/// Repository identity as sent by GitLab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookRepository {
    pub name: String,
    pub url: String,
    pub description: String,
    pub home: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookCommit {
    pub id: String,
    pub message: String,
    pub timestamp: String,
    pub url: String,
    pub author: CommitAuthor,
}

/// A push notification, immutable once decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookEvent {
    pub before: String,
    pub after: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(rename = "user_name", alias = "username")]
    pub user_name: String,
    pub user_id: i64,
    pub project_id: i64,
    pub repository: HookRepository,
    pub commits: Vec<HookCommit>,
    pub total_commits_count: u64,
}

impl WebhookEvent {
    /// Repository name used to route the event.
    pub fn repository_name(&self) -> &str {
        &self.repository.name
    }

    /// URL used for clone and pull.
    pub fn repository_url(&self) -> &str {
        &self.repository.url
    }

    /// Abbreviated SHA of the pushed head, for log lines.
    pub fn short_after(&self) -> &str {
        self.after
            .get(..8.min(self.after.len()))
            .unwrap_or(&self.after)
    }
}
