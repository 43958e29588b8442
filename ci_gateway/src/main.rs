//! Centrix CI Gateway: standalone webhook ingestion server.
//!
//! Receives provider webhooks at `/ci/webhook`, sequences and records every
//! delivery, and admits builds into the execution queue.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;

use centrix_ci_gateway::compiler::JsonPipelineCompiler;
use centrix_ci_gateway::config::CiConfig;
use centrix_ci_gateway::metrics;
use centrix_ci_gateway::queue::MemoryQueue;
use centrix_ci_gateway::routes::{self, CiRouterState};
use centrix_ci_gateway::scm::GithubClient;
use centrix_ci_gateway::seeder;
use centrix_ci_gateway::services::BackgroundWork;
use centrix_ci_gateway::store::{MemoryStore, Store};

#[derive(Parser)]
#[command(name = "centrix-ci-gateway", about = "Centrix CI webhook gateway")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// Capacity of the in-process execution queue
    #[arg(long, env = "CI_QUEUE_CAPACITY", default_value = "10000")]
    queue_capacity: usize,

    /// JSON file of repositories to enroll at startup
    #[arg(long, env = "CI_REPOS_FILE")]
    repos_file: Option<PathBuf>,
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

    tracing::info!("Starting Centrix CI Gateway...");

    let config = CiConfig::from_env();
    let queue = Arc::new(MemoryQueue::new(cli.queue_capacity));
    let background = Arc::new(BackgroundWork::new());

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    match &cli.repos_file {
        Some(path) => {
            let enrolled = seeder::seed_from_path(store.as_ref(), path).await?;
            tracing::info!("Enrolled {} repositories from {}", enrolled, path.display());
        }
        None => tracing::warn!("CI_REPOS_FILE not set -- no repositories enrolled"),
    }

    let state = CiRouterState {
        store,
        scm: Arc::new(GithubClient::new(
            &config.github_api_url,
            &config.github_token,
            &config.status_context,
        )),
        compiler: Arc::new(JsonPipelineCompiler),
        queue: queue.clone(),
        canceller: queue,
        config: Arc::new(config),
        background: background.clone(),
    };

    let app = Router::new().nest("/ci", routes::ci_router(state));

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Centrix CI Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(pending = background.pending(), "Draining background work...");
    background.drain().await;
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
