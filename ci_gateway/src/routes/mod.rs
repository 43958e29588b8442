//! CI gateway HTTP routes: webhook ingestion and health.

pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::compiler::Compiler;
use crate::config::CiConfig;
use crate::error::WebhookError;
use crate::queue::{BuildCanceller, Queue};
use crate::scm::SourceControl;
use crate::services::BackgroundWork;
use crate::store::Store;

/// Shared state for CI route handlers.
#[derive(Clone)]
pub struct CiRouterState {
    pub store: Arc<dyn Store>,
    pub scm: Arc<dyn SourceControl>,
    pub compiler: Arc<dyn Compiler>,
    pub queue: Arc<dyn Queue>,
    pub canceller: Arc<dyn BuildCanceller>,
    pub config: Arc<CiConfig>,
    pub background: Arc<BackgroundWork>,
}

/// Build the CI gateway's Axum router (nested at `/ci`).
pub fn ci_router(state: CiRouterState) -> Router {
    let timeout = state.config.request_timeout;

    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

async fn webhook_handler(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<webhook::WebhookResponse, WebhookError> {
    crate::metrics::webhook_received(
        headers
            .get(crate::scm::github::webhook::HEADER_EVENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state, headers, body).await
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}
