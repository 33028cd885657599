//! Application state and router assembly.

use crate::config::ServiceConfig;
use crate::handlers;
use crate::services::{Database, DocumentRenderer, MessageGateway};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub db: Database,
    pub gateway: MessageGateway,
    pub renderer: Arc<dyn DocumentRenderer>,
}

/// Build the HTTP router: probes, metrics, and the Meta webhook pair.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/api/wa/webhook",
            get(handlers::verify_webhook).post(handlers::receive_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
