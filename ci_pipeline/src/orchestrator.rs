//! Job orchestration: one webhook event in, at most one final commit
//! status out.
//!
//! ```text
//! Received -> Synced -> Built -> Tested -> Reported
//! ```
//!
//! Every stage failure short-circuits the rest of the run. The working
//! directory is held exclusively from sync until the last stage finishes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::event::{self, BuildEvent};
use crate::stages::{BuildRunner, StageOutcome, StageRunner, TestRunner};
use crate::status::{CommitState, CommitStatusReport, StatusReporter, StatusSink, StatusTarget};
use crate::sync::{GitSynchronizer, SyncResult, Synchronizer};
use crate::workspace::{self, RepoLocks, SyncLedger, SyncRecord, WorkingDirectoryState};

pub const DESC_SUCCESS: &str = "All tests passed and the code compiled!";
pub const DESC_BUILD_FAILED: &str = "Failed to compile the code!";
pub const DESC_TESTS_FAILED: &str = "The code compiled but the tests failed!";
pub const DESC_PENDING: &str = "Build started";

/// Furthest point a run reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Received,
    Synced,
    Built,
    Tested,
    Reported,
}

/// Everything one run did, for logs and tests.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub local_path: PathBuf,
    pub phase: RunPhase,
    pub sync: Option<SyncResult>,
    pub build: StageOutcome,
    pub test: StageOutcome,
    /// Final status sent (or attempted) for the commit.
    pub status: Option<CommitStatusReport>,
    pub status_delivered: bool,
    pub duration_ms: u64,
}

impl RunReport {
    fn new(run_id: Uuid, local_path: PathBuf) -> Self {
        Self {
            run_id,
            local_path,
            phase: RunPhase::Received,
            sync: None,
            build: StageOutcome::Skipped,
            test: StageOutcome::Skipped,
            status: None,
            status_delivered: false,
            duration_ms: 0,
        }
    }

    /// Short label for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match &self.sync {
            None => "not_synced",
            Some(SyncResult::ConflictFailure(_)) => "sync_conflict",
            Some(SyncResult::OtherFailure(_)) => "sync_failed",
            Some(_) if !self.build.is_success() => "build_failed",
            Some(_) if !self.test.is_success() => "test_failed",
            Some(_) => "success",
        }
    }
}

/// Sequences sync, build, test and status reporting for each event.
pub struct JobOrchestrator {
    config: PipelineConfig,
    synchronizer: Arc<dyn Synchronizer>,
    builder: Arc<dyn StageRunner>,
    tester: Arc<dyn StageRunner>,
    reporter: Arc<dyn StatusSink>,
    locks: RepoLocks,
    ledger: SyncLedger,
}

impl JobOrchestrator {
    pub fn new(
        config: PipelineConfig,
        synchronizer: Arc<dyn Synchronizer>,
        builder: Arc<dyn StageRunner>,
        tester: Arc<dyn StageRunner>,
        reporter: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            synchronizer,
            builder,
            tester,
            reporter,
            locks: RepoLocks::new(),
            ledger: SyncLedger::new(),
        }
    }

    /// Orchestrator using git, shell commands and the GitHub status API.
    pub fn from_config(config: PipelineConfig) -> Self {
        let builder = Arc::new(BuildRunner::from_config(&config));
        let tester = Arc::new(TestRunner::from_config(&config));
        let reporter = Arc::new(StatusReporter::new(&config.github_api_url, &config.github_token));
        Self::new(config, Arc::new(GitSynchronizer::new()), builder, tester, reporter)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Working directory for the event's repository.
    pub fn local_path(&self, event: &BuildEvent) -> PathBuf {
        workspace::local_path(&self.config.workspace_dir, &event.repo_clone_url)
    }

    /// Parse a raw webhook body and run it. Unusable payloads are logged and
    /// produce no run at all.
    pub async fn handle_payload(&self, raw_body: &[u8]) -> Option<RunReport> {
        match event::parse(raw_body) {
            Ok(event) => Some(self.run(event).await),
            Err(e) => {
                tracing::info!("Ignoring webhook payload: {e}");
                None
            }
        }
    }

    /// Run the pipeline for one event.
    pub async fn run(&self, event: BuildEvent) -> RunReport {
        let run_id = Uuid::new_v4();
        let local_path = self.local_path(&event);
        let span = tracing::info_span!(
            "ci_run",
            %run_id,
            repo = %event.repo_clone_url,
            branch = event.git_ref.as_deref().unwrap_or("-")
        );

        async move {
            let start = Instant::now();
            let _guard = self.locks.acquire(&local_path).await;
            tracing::info!(path = %local_path.display(), "Run started");

            let mut report = RunReport::new(run_id, local_path.clone());
            self.execute(&event, &local_path, &mut report).await;

            report.duration_ms = start.elapsed().as_millis() as u64;
            crate::metrics::run_finished(report.outcome());
            tracing::info!(
                outcome = report.outcome(),
                duration_ms = report.duration_ms,
                "Run finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, event: &BuildEvent, local_path: &Path, report: &mut RunReport) {
        let first_sync = WorkingDirectoryState::of(local_path) == WorkingDirectoryState::Absent;

        let sync = self.synchronizer.sync(event, local_path).await;
        self.record_sync(event, local_path, &sync);
        report.sync = Some(sync.clone());

        match &sync {
            SyncResult::Cloned | SyncResult::Pulled => {}
            SyncResult::ConflictFailure(reason) => {
                tracing::warn!("Merge conflict while updating working copy: {reason}");
                let branch = event.git_ref.as_deref().unwrap_or("branch");
                let description = format!("Merge conflict while updating {branch}: {reason}");
                if !first_sync && self.config.report_sync_failures {
                    self.finish_with(event, report, CommitState::Failure, &description).await;
                }
                return;
            }
            SyncResult::OtherFailure(reason) => {
                if first_sync {
                    tracing::error!("Clone failed: {reason}");
                } else {
                    tracing::error!("Working copy update failed: {reason}");
                    if self.config.report_sync_failures {
                        let description = format!("Could not update working copy: {reason}");
                        self.finish_with(event, report, CommitState::Error, &description).await;
                    }
                }
                return;
            }
        }
        report.phase = RunPhase::Synced;

        // First clone is built for the logs only; status reporting starts
        // with the next push against the existing clone.
        let reporting = sync == SyncResult::Pulled;

        if reporting && self.config.report_pending {
            if let Some(target) = status_target(event) {
                let pending = CommitStatusReport::new(CommitState::Pending, DESC_PENDING);
                self.reporter.publish(&target, &pending).await;
            }
        }

        report.build = self.builder.run(local_path, event).await;
        report.phase = RunPhase::Built;

        let (state, description) = if report.build.is_success() {
            report.test = self.tester.run(local_path, event).await;
            report.phase = RunPhase::Tested;
            if report.test.is_success() {
                (CommitState::Success, DESC_SUCCESS)
            } else {
                (CommitState::Failure, DESC_TESTS_FAILED)
            }
        } else {
            (CommitState::Failure, DESC_BUILD_FAILED)
        };

        if reporting {
            self.finish_with(event, report, state, description).await;
        } else {
            tracing::info!(
                state = %state,
                "Initial clone built; no commit status for the first sync"
            );
        }
    }

    /// Post the final status for the run, if the event names a commit.
    async fn finish_with(
        &self,
        event: &BuildEvent,
        report: &mut RunReport,
        state: CommitState,
        description: &str,
    ) {
        let status = CommitStatusReport::new(state, description);
        match status_target(event) {
            Some(target) => {
                report.status_delivered = self.reporter.publish(&target, &status).await;
                report.status = Some(status);
                report.phase = RunPhase::Reported;
            }
            None => {
                tracing::warn!(
                    state = %state,
                    "Event lacks owner, repository or commit; status not reported"
                );
            }
        }
    }

    fn record_sync(&self, event: &BuildEvent, local_path: &Path, sync: &SyncResult) {
        let previous = self.ledger.get(local_path);
        let last_commit = if sync.is_success() {
            event.commit_sha.clone()
        } else {
            previous.and_then(|r| r.last_commit)
        };

        self.ledger.record(SyncRecord {
            path: local_path.to_path_buf(),
            clone_url: event.repo_clone_url.clone(),
            state: WorkingDirectoryState::of(local_path),
            branch: event.git_ref.clone(),
            last_commit,
            last_result: sync.label().to_string(),
            updated_at: Utc::now(),
        });
    }
}

fn status_target(event: &BuildEvent) -> Option<StatusTarget> {
    Some(StatusTarget {
        owner: event.repo_owner.clone()?,
        repo: event.repo_name.clone()?,
        sha: event.commit_sha.clone()?,
    })
}
