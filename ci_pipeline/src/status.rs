//! Commit status reporting (`POST /repos/{owner}/{repo}/statuses/{sha}`).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Context label attached to every status this server posts.
pub const STATUS_CONTEXT: &str = "ci-server";

/// GitHub rejects descriptions longer than this.
const MAX_DESCRIPTION_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitState {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommitState::Pending),
            "success" => Ok(CommitState::Success),
            "failure" => Ok(CommitState::Failure),
            "error" => Ok(CommitState::Error),
            other => Err(ReportError::InvalidState(other.to_string())),
        }
    }
}

/// Body of one commit status POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitStatusReport {
    pub state: CommitState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub context: String,
}

impl CommitStatusReport {
    pub fn new(state: CommitState, description: &str) -> Self {
        Self {
            state,
            description: description.chars().take(MAX_DESCRIPTION_CHARS).collect(),
            context: STATUS_CONTEXT.to_string(),
        }
    }
}

/// Commit a status is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    pub owner: String,
    pub repo: String,
    pub sha: String,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("invalid commit state '{0}'")]
    InvalidState(String),

    #[error("no access token configured")]
    MissingToken,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Publishes commit statuses. Implemented by [`StatusReporter`]; tests swap
/// in recorders.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, target: &StatusTarget, report: &CommitStatusReport) -> bool;
}

/// Posts commit statuses to the GitHub REST API.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl StatusReporter {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Post `state` for a commit. Returns `true` only on HTTP 201.
    ///
    /// An unrecognized `state` is rejected before any request is made.
    /// No retries: one attempt, failures are logged.
    pub async fn report(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
        state: &str,
        description: &str,
        token: &str,
    ) -> bool {
        let result = match state.parse::<CommitState>() {
            Ok(state) => {
                let target = StatusTarget {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    sha: commit_sha.to_string(),
                };
                self.send(&target, &CommitStatusReport::new(state, description), token)
                    .await
            }
            Err(e) => Err(e),
        };

        let delivered = result.is_ok();
        crate::metrics::status_report(state, delivered);
        match result {
            Ok(()) => {
                tracing::info!(owner, repo, sha = commit_sha, state, "Commit status posted");
            }
            Err(ReportError::MissingToken) => {
                tracing::debug!("GitHub token not set, skipping status update");
            }
            Err(e) => {
                tracing::warn!(owner, repo, sha = commit_sha, state, "GitHub status update failed: {e}");
            }
        }
        delivered
    }

    /// Send one status POST.
    pub async fn send(
        &self,
        target: &StatusTarget,
        report: &CommitStatusReport,
        token: &str,
    ) -> Result<(), ReportError> {
        if token.is_empty() {
            return Err(ReportError::MissingToken);
        }

        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_url, target.owner, target.repo, target.sha
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "cihook")
            .json(report)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::CREATED {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(ReportError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl StatusSink for StatusReporter {
    async fn publish(&self, target: &StatusTarget, report: &CommitStatusReport) -> bool {
        self.report(
            &target.owner,
            &target.repo,
            &target.sha,
            report.state.as_str(),
            &report.description,
            &self.token,
        )
        .await
    }
}
