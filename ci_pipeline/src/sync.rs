//! Repository synchronization: clone on first sight, fetch + checkout +
//! pull afterwards.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::event::BuildEvent;
use crate::git::{self, GitResult, SyncError};
use crate::workspace::WorkingDirectoryState;

/// Outcome of bringing a working directory up to date with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum SyncResult {
    /// Directory was absent and has been cloned.
    Cloned,
    /// Existing clone was fetched, switched to the event's branch and merged.
    Pulled,
    /// Merging the remote branch conflicted with local history.
    ConflictFailure(String),
    /// Anything else: unreachable remote, missing branch, git errors.
    OtherFailure(String),
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Cloned | SyncResult::Pulled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncResult::Cloned => "cloned",
            SyncResult::Pulled => "pulled",
            SyncResult::ConflictFailure(_) => "conflict",
            SyncResult::OtherFailure(_) => "failed",
        }
    }
}

/// Brings a working directory in line with a [`BuildEvent`].
#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn sync(&self, event: &BuildEvent, local_path: &Path) -> SyncResult;
}

/// [`Synchronizer`] backed by the `git` CLI.
#[derive(Debug, Default, Clone)]
pub struct GitSynchronizer;

impl GitSynchronizer {
    pub fn new() -> Self {
        Self
    }

    async fn update(&self, event: &BuildEvent, local_path: &Path) -> SyncResult {
        match update_working_copy(event, local_path).await {
            Ok(()) => SyncResult::Pulled,
            Err(SyncError::Conflict { details }) => SyncResult::ConflictFailure(details),
            Err(e) => SyncResult::OtherFailure(e.to_string()),
        }
    }
}

#[async_trait]
impl Synchronizer for GitSynchronizer {
    async fn sync(&self, event: &BuildEvent, local_path: &Path) -> SyncResult {
        match WorkingDirectoryState::of(local_path) {
            WorkingDirectoryState::Absent => {
                tracing::info!(
                    url = %event.repo_clone_url,
                    path = %local_path.display(),
                    "Cloning repository"
                );
                match git::clone(&event.repo_clone_url, local_path, event.git_ref.as_deref()).await {
                    Ok(()) => SyncResult::Cloned,
                    Err(SyncError::AlreadyExists { .. }) => {
                        tracing::info!(
                            path = %local_path.display(),
                            "Clone target already exists, updating instead"
                        );
                        self.update(event, local_path).await
                    }
                    Err(e) => SyncResult::OtherFailure(e.to_string()),
                }
            }
            WorkingDirectoryState::Present => self.update(event, local_path).await,
        }
    }
}

async fn update_working_copy(event: &BuildEvent, local_path: &Path) -> GitResult<()> {
    git::fetch(local_path).await?;

    let current = git::current_branch(local_path).await?;
    let branch = match &event.git_ref {
        Some(branch) => branch.clone(),
        // No branch in the event: keep whatever is checked out.
        None if current != "HEAD" => current.clone(),
        None => {
            return Err(SyncError::CommandFailed {
                command: "git rev-parse --abbrev-ref HEAD".to_string(),
                stderr: "event has no branch and the working copy is detached".to_string(),
            })
        }
    };

    if !git::remote_branch_exists(local_path, &branch).await? {
        return Err(SyncError::NotFound { branch });
    }

    if current != branch {
        tracing::info!(from = %current, to = %branch, "Switching branch");
        git::checkout(local_path, &branch).await?;
    }

    git::pull(local_path, &branch).await?;
    tracing::info!(path = %local_path.display(), branch = %branch, "Working copy updated");
    Ok(())
}
