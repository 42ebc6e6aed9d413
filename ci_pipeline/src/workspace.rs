//! Working-directory bookkeeping: path derivation, per-repository locks and
//! the in-memory sync ledger.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

/// Whether a working directory has been cloned before. Derived from the
/// filesystem, never stored as the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingDirectoryState {
    Absent,
    Present,
}

impl WorkingDirectoryState {
    pub fn of(path: &Path) -> Self {
        if path.exists() {
            Self::Present
        } else {
            Self::Absent
        }
    }
}

/// Directory name for a clone URL: `<owner>-<repo>-<hash>` from the last two
/// path segments, or `repo-<hash>` when the URL has no usable path. The hash
/// covers the whole normalized URL, so repositories that only differ in host
/// or in where a `-` falls between owner and name get separate directories.
pub fn directory_name(clone_url: &str) -> String {
    let trimmed = clone_url.trim().trim_end_matches('/');
    let normalized = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let digest = url_digest(normalized);
    // Drop the scheme so "https://host" does not count as a segment.
    let without_scheme = normalized.split_once("://").map_or(normalized, |(_, rest)| rest);

    let segments: Vec<&str> = without_scheme
        .split(['/', ':', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    if segments.len() >= 3 {
        let owner = sanitize(segments[segments.len() - 2]);
        let repo = sanitize(segments[segments.len() - 1]);
        if !owner.is_empty() && !repo.is_empty() {
            return format!("{owner}-{repo}-{}", &digest[..8]);
        }
    }

    format!("repo-{}", &digest[..12])
}

fn url_digest(normalized_url: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(normalized_url.as_bytes()))
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Working directory for a clone URL under `workspace_dir`.
pub fn local_path(workspace_dir: &Path, clone_url: &str) -> PathBuf {
    workspace_dir.join(directory_name(clone_url))
}

/// Exclusive access to working directories, one async mutex per path.
///
/// Runs for different paths never contend.
#[derive(Debug, Default, Clone)]
pub struct RepoLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `path` is free and hold it until the guard is dropped.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only the map refers to have no holder and no waiter.
            locks.retain(|p, lock| p == path || Arc::strong_count(lock) > 1);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Last known synchronization result for one working directory.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRecord {
    pub path: PathBuf,
    pub clone_url: String,
    pub state: WorkingDirectoryState,
    pub branch: Option<String>,
    pub last_commit: Option<String>,
    pub last_result: String,
    pub updated_at: DateTime<Utc>,
}

/// Keyed store of [`SyncRecord`]s, shared between runs and the HTTP view.
#[derive(Debug, Default, Clone)]
pub struct SyncLedger {
    records: Arc<Mutex<HashMap<PathBuf, SyncRecord>>>,
}

impl SyncLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: SyncRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.path.clone(), record);
    }

    pub fn get(&self, path: &Path) -> Option<SyncRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(path).cloned()
    }

    /// All records, ordered by path.
    pub fn snapshot(&self) -> Vec<SyncRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<SyncRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }
}
