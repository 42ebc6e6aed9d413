//! cihook server: GitHub webhook listener for the CI pipeline.
//!
//! Receives push and pull request deliveries, queues them, and lets a
//! bounded pool of workers sync, build, test and report each one.

mod config;
mod metrics;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use ci_pipeline::JobOrchestrator;
use clap::Parser;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "cihook", about = "Webhook-driven CI server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting cihook server...");

    let ci_config = config::CiConfig::from_env();
    tokio::fs::create_dir_all(&ci_config.pipeline.workspace_dir).await?;
    tracing::info!(
        workspace = %ci_config.pipeline.workspace_dir.display(),
        build = %ci_config.pipeline.build_command,
        test = %ci_config.pipeline.test_command,
        "Pipeline configured"
    );

    // Job queue + dispatcher
    let orchestrator = Arc::new(JobOrchestrator::from_config(ci_config.pipeline.clone()));
    let (jobs, queue) = mpsc::channel(ci_config.queue_capacity);
    let dispatcher = tokio::spawn(services::dispatcher::run_dispatcher(
        orchestrator.clone(),
        queue,
        ci_config.max_concurrent_builds,
        ci_config.queue_capacity,
    ));

    let state = routes::CiRouterState {
        ledger: orchestrator.ledger().clone(),
        config: ci_config,
        jobs,
    };
    let app = routes::app(state);

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("cihook listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The router (and with it the queue sender) is gone; let queued and
    // running jobs finish.
    tracing::info!("Draining job queue...");
    dispatcher.await?;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
