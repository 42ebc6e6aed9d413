//! HTTP routes: GitHub webhook intake and a read-only view of working copies.

pub mod api;
pub mod webhook;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use ci_pipeline::workspace::SyncRecord;
use ci_pipeline::{BuildEvent, SyncLedger};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::CiConfig;

/// Shared state for CI route handlers.
#[derive(Clone)]
pub struct CiRouterState {
    pub config: CiConfig,
    /// Producer side of the bounded job queue.
    pub jobs: mpsc::Sender<BuildEvent>,
    pub ledger: SyncLedger,
}

/// Full application router: CI routes under `/ci` plus `/health`.
pub fn app(state: CiRouterState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/ci", ci_router(state))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Build the CI Axum router (nested at `/ci`).
pub fn ci_router(state: CiRouterState) -> Router {
    Router::new()
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Working copy API
        .route("/api/repos", get(list_repos_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state.config, &state.jobs, &headers, body)
}

// ── Working copy API ──

async fn list_repos_handler(State(state): State<CiRouterState>) -> Json<Vec<SyncRecord>> {
    Json(api::list_repos(&state.ledger))
}
