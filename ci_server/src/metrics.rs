//! Prometheus metrics for the webhook listener. Run-level metrics are
//! recorded by the pipeline itself.

use metrics::counter;

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("ci_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record an event turned away because the job queue was full.
pub fn job_rejected() {
    counter!("ci_jobs_rejected_total").increment(1);
}
