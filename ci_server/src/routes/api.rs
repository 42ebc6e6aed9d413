//! CI API: read-only view of the working copies this server manages.

use ci_pipeline::workspace::SyncRecord;
use ci_pipeline::SyncLedger;

/// Every known working copy with its last sync result, ordered by path.
pub fn list_repos(ledger: &SyncLedger) -> Vec<SyncRecord> {
    ledger.snapshot()
}
