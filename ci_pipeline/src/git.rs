//! Thin async wrappers over the `git` CLI.
//!
//! Every command runs with a clean configuration (no system or global git
//! config, no terminal prompts) so behaviour does not depend on the host.

use std::path::Path;
use std::process::{Output, Stdio};

use thiserror::Error;
use tokio::process::Command;

/// Identity used for merge commits created by `git pull`.
const COMMITTER_NAME: &str = "cihook";
const COMMITTER_EMAIL: &str = "cihook@localhost";

/// Errors from git operations during clone or update.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The requested branch does not exist on the remote.
    #[error("branch '{branch}' not found on remote")]
    NotFound { branch: String },

    /// Pulling produced a merge conflict.
    #[error("merge conflict: {details}")]
    Conflict { details: String },

    /// The remote could not be reached or the URL is invalid.
    #[error("transport error: {details}")]
    Transport { details: String },

    /// Clone target already exists.
    #[error("destination {path} already exists")]
    AlreadyExists { path: String },

    /// Any other git failure.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GitResult<T> = Result<T, SyncError>;

/// Create a git command with a clean environment, running in `workdir`.
pub(crate) fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

/// Run git, returning the output regardless of exit status.
async fn git_output(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    tracing::debug!(workdir = %workdir.display(), "git {}", args.join(" "));
    Ok(git_command(workdir).args(args).output().await?)
}

/// Run git and fail on a non-zero exit status.
pub async fn run_git(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_output(workdir, args).await?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(command_failed(args, &output))
    }
}

/// Run git and return trimmed stdout.
pub async fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git(workdir, args).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn command_failed(args: &[&str], output: &Output) -> SyncError {
    SyncError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Clone `url` into `dest`, optionally checking out `branch`.
///
/// Only the parent of `dest` is created; git creates `dest` itself and
/// removes it again if the clone fails.
pub async fn clone(url: &str, dest: &Path, branch: Option<&str>) -> GitResult<()> {
    // git runs inside `parent`, so a relative `dest` would resolve twice.
    let dest = std::path::absolute(dest)?;
    let parent = match dest.parent() {
        Some(p) => p.to_path_buf(),
        None => return Err(SyncError::AlreadyExists { path: dest.display().to_string() }),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let dest_str = dest.to_string_lossy().to_string();
    let mut args = vec!["clone", "--quiet"];
    if let Some(branch) = branch {
        args.extend(["--branch", branch]);
    }
    args.extend(["--", url, dest_str.as_str()]);

    let output = git_output(&parent, &args).await?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.contains("already exists and is not an empty directory") {
        return Err(SyncError::AlreadyExists { path: dest_str });
    }
    if let Some(branch) = branch {
        if stderr.contains("Remote branch") && stderr.contains("not found") {
            return Err(SyncError::NotFound { branch: branch.to_string() });
        }
    }
    Err(SyncError::Transport { details: stderr })
}

/// Fetch all branches from `origin`, pruning deleted ones.
pub async fn fetch(workdir: &Path) -> GitResult<()> {
    let output = git_output(workdir, &["fetch", "--quiet", "--prune", "origin"]).await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(SyncError::Transport {
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Whether `origin/<branch>` exists after the last fetch.
pub async fn remote_branch_exists(workdir: &Path, branch: &str) -> GitResult<bool> {
    let reference = format!("refs/remotes/origin/{branch}");
    let output = git_output(workdir, &["show-ref", "--verify", "--quiet", &reference]).await?;
    Ok(output.status.success())
}

/// Whether a local branch named `branch` exists.
pub async fn local_branch_exists(workdir: &Path, branch: &str) -> GitResult<bool> {
    let reference = format!("refs/heads/{branch}");
    let output = git_output(workdir, &["show-ref", "--verify", "--quiet", &reference]).await?;
    Ok(output.status.success())
}

/// Name of the checked-out branch (`HEAD` when detached).
pub async fn current_branch(workdir: &Path) -> GitResult<String> {
    run_git_stdout(workdir, &["rev-parse", "--abbrev-ref", "HEAD"]).await
}

/// Switch to `branch`, creating it to track `origin/<branch>` if needed.
pub async fn checkout(workdir: &Path, branch: &str) -> GitResult<()> {
    if local_branch_exists(workdir, branch).await? {
        run_git(workdir, &["checkout", "--quiet", branch]).await?;
    } else {
        let upstream = format!("origin/{branch}");
        run_git(workdir, &["checkout", "--quiet", "-b", branch, "--track", &upstream]).await?;
    }
    Ok(())
}

/// Merge `origin/<branch>` into the current branch.
///
/// A conflicting merge is aborted so the tree is clean for the next run.
pub async fn pull(workdir: &Path, branch: &str) -> GitResult<()> {
    let name = format!("user.name={COMMITTER_NAME}");
    let email = format!("user.email={COMMITTER_EMAIL}");
    let args = [
        "-c",
        name.as_str(),
        "-c",
        email.as_str(),
        "pull",
        "--no-rebase",
        "--no-edit",
        "origin",
        branch,
    ];
    let output = git_output(workdir, &args).await?;
    if output.status.success() {
        return Ok(());
    }

    // git reports conflicts on stdout, not stderr
    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
        let details = conflict_summary(&combined);
        if let Err(e) = run_git(workdir, &["merge", "--abort"]).await {
            tracing::warn!(workdir = %workdir.display(), "git merge --abort failed: {e}");
        }
        return Err(SyncError::Conflict { details });
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.contains("Could not read from remote")
        || stderr.contains("unable to access")
        || stderr.contains("does not appear to be a git repository")
    {
        return Err(SyncError::Transport { details: stderr });
    }
    Err(command_failed(&args, &output))
}

fn conflict_summary(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("CONFLICT"))
        .collect();
    if lines.is_empty() {
        "automatic merge failed".to_string()
    } else {
        lines.join("; ")
    }
}

/// Full SHA of `HEAD`.
pub async fn head_sha(workdir: &Path) -> GitResult<String> {
    run_git_stdout(workdir, &["rev-parse", "HEAD"]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_summary_lists_conflicting_paths() {
        let out = "Auto-merging a.txt\nCONFLICT (content): Merge conflict in a.txt\nCONFLICT (content): Merge conflict in b.txt\nAutomatic merge failed; fix conflicts";
        assert_eq!(
            conflict_summary(out),
            "CONFLICT (content): Merge conflict in a.txt; CONFLICT (content): Merge conflict in b.txt"
        );
        assert_eq!(conflict_summary("Automatic merge failed"), "automatic merge failed");
    }

    #[tokio::test]
    async fn clone_of_invalid_url_fails_without_creating_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("clone");

        let err = clone("hello", &dest, None).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport { .. }), "got {err:?}");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn clone_into_non_empty_directory_reports_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), "x").unwrap();

        let err = clone("https://invalid.invalid/u/r.git", dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists { .. }), "got {err:?}");
    }
}
