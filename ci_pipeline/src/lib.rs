//! Webhook-driven CI pipeline: push event in, commit status out.
//!
//! One webhook delivery becomes one run: the payload is parsed into a
//! [`BuildEvent`], the repository's working copy is cloned or updated, the
//! configured build and test commands are executed and their output scanned
//! for success markers, and the outcome is posted back as a commit status.
//!
//! Runs for the same working directory are serialized; unrelated
//! repositories proceed independently.

pub mod config;
pub mod event;
pub mod git;
pub mod metrics;
pub mod orchestrator;
pub mod stages;
pub mod status;
pub mod sync;
pub mod workspace;

pub use config::PipelineConfig;
pub use event::{BuildEvent, ParseError};
pub use orchestrator::{JobOrchestrator, RunReport};
pub use stages::{BuildRunner, StageOutcome, TestRunner};
pub use status::{CommitState, CommitStatusReport, StatusReporter};
pub use sync::{GitSynchronizer, SyncResult};
pub use workspace::{RepoLocks, SyncLedger, WorkingDirectoryState};
