//! Build and test stages: shell commands whose stdout is scanned line by
//! line for a success marker.

pub mod build;

pub use build::BuildRunner;
pub use test::TestRunner;

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::event::BuildEvent;

/// Lines of stdout kept for diagnostics after a stage finishes.
const TAIL_LINES: usize = 200;

/// Result of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure(String),
    Skipped,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}

/// Failures while spawning or reading a stage process. Treated exactly like
/// a missing success marker.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("failed to read process output: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0}s")]
    TimedOut(u64),
}

/// A stage that can be run against a working directory.
#[async_trait]
pub trait StageRunner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, local_path: &Path, event: &BuildEvent) -> StageOutcome;
}

/// Shell command plus the rules for judging its output.
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub name: &'static str,
    pub command: String,
    pub success_marker: String,
    pub timeout: Duration,
    pub require_exit_success: bool,
}

/// What a finished stage process produced.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub marker_seen: bool,
    pub status: ExitStatus,
    /// Last [`TAIL_LINES`] lines of stdout.
    pub tail: VecDeque<String>,
    pub duration_ms: u64,
}

impl StageCommand {
    /// Whether `output` counts as a pass. The marker is the primary signal;
    /// the exit status only matters when `require_exit_success` is set.
    pub fn passed(&self, output: &StageOutput) -> bool {
        output.marker_seen && (!self.require_exit_success || output.status.success())
    }

    /// Run the command in `workdir` through `bash -c`, scanning stdout.
    pub async fn execute(
        &self,
        workdir: &Path,
        env: &[(&str, &str)],
    ) -> Result<StageOutput, ExecutionError> {
        let start = Instant::now();

        let mut cmd = Command::new("bash");
        cmd.args(["-c", &self.command])
            .current_dir(workdir)
            .env("CI", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let stage = self.name;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let _ = for_each_line(stderr, |line| {
                    tracing::debug!(stage, "stderr: {line}");
                })
                .await;
            });
        }
        let stdout = child.stdout.take();

        let marker = self.success_marker.as_str();
        let scan = async {
            let mut marker_seen = false;
            let mut tail = VecDeque::with_capacity(TAIL_LINES);
            if let Some(stdout) = stdout {
                for_each_line(stdout, |line| {
                    tracing::debug!(stage, "{line}");
                    if line.contains(marker) {
                        marker_seen = true;
                    }
                    if tail.len() == TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                })
                .await?;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((marker_seen, tail, status))
        };

        let result = tokio::time::timeout(self.timeout, scan).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        crate::metrics::stage_duration(self.name, duration_ms);

        match result {
            Ok(Ok((marker_seen, tail, status))) => Ok(StageOutput {
                marker_seen,
                status,
                tail,
                duration_ms,
            }),
            Ok(Err(e)) => Err(ExecutionError::Io(e)),
            Err(_) => {
                kill_process_group(&mut child).await;
                Err(ExecutionError::TimedOut(self.timeout.as_secs()))
            }
        }
    }
}

/// Read `reader` line by line (lossy UTF-8, line endings stripped).
async fn for_each_line<R, F>(reader: R, mut on_line: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        on_line(line.trim_end_matches(['\n', '\r']));
    }
}

/// Kill the stage's whole process group, not just the `bash` wrapper.
async fn kill_process_group(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        // process_group(0) at spawn makes the pid the group id.
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!("killpg({pid}) failed: {e}");
        }
    }
    let _ = child.kill().await;
}

/// `CI_BRANCH` / `CI_COMMIT` for the stage environment.
pub(crate) fn event_env(event: &BuildEvent) -> Vec<(&'static str, &str)> {
    let mut env = Vec::new();
    if let Some(branch) = event.git_ref.as_deref() {
        env.push(("CI_BRANCH", branch));
    }
    if let Some(commit) = event.commit_sha.as_deref() {
        env.push(("CI_COMMIT", commit));
    }
    env
}
