//! GitHub webhook handler: authenticates the delivery, parses it into a
//! build event and queues it for the dispatcher.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use ci_pipeline::{event, BuildEvent};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::CiConfig;
use crate::services::github_service;

/// Handle an incoming GitHub webhook payload.
///
/// Never waits on the pipeline: the event is queued and the run happens on
/// the dispatcher. Payloads that do not describe a buildable push are
/// acknowledged with 200 and dropped.
pub fn handle_webhook(
    config: &CiConfig,
    jobs: &mpsc::Sender<BuildEvent>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    // Validate signature
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&config.github_webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if event_type == "ping" {
        tracing::info!("Received GitHub ping webhook");
        return Ok(StatusCode::OK);
    }

    let event = match event::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::info!(event_type, "Ignoring webhook: {e}");
            return Ok(StatusCode::OK);
        }
    };

    tracing::info!(
        repo = %event.repo_clone_url,
        branch = event.git_ref.as_deref().unwrap_or("-"),
        commit = event.commit_sha.as_deref().unwrap_or("-"),
        initial_push = event.is_initial_push,
        "Queueing build from {event_type} webhook"
    );

    match jobs.try_send(event) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(TrySendError::Full(event)) => {
            crate::metrics::job_rejected();
            tracing::warn!(repo = %event.repo_clone_url, "Job queue full, rejecting webhook");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(TrySendError::Closed(_)) => {
            tracing::error!("Job dispatcher is gone, rejecting webhook");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
