//! Pipeline metrics. Exporting is the host binary's job; without an
//! installed recorder these calls are no-ops.

use metrics::{counter, histogram};

/// Record a finished run by its terminal outcome.
pub fn run_finished(outcome: &str) {
    counter!("ci_runs_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record how long a build or test subprocess ran.
pub fn stage_duration(stage: &str, duration_ms: u64) {
    histogram!("ci_stage_duration_ms", "stage" => stage.to_string()).record(duration_ms as f64);
}

/// Record a commit status attempt.
pub fn status_report(state: &str, delivered: bool) {
    counter!(
        "ci_status_reports_total",
        "state" => state.to_string(),
        "delivered" => delivered.to_string()
    )
    .increment(1);
}
