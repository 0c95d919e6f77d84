//! API module for the Shellcast orchestrator
//!
//! Provides HTTP endpoints for:
//! - Session creation
//! - Command execution
//! - Live output streaming (server-sent events)
//! - Health checks and metrics

mod error;
mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use error::ApiError;
pub use handlers::health::mark_started;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // Prometheus metrics
        .route("/metrics", get(crate::metrics::metrics_handler))
        .nest("/terminal", terminal_routes())
        .with_state(state)
}

/// Terminal routes
fn terminal_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", get(handlers::session::create_session))
        .route("/execute", post(handlers::execute::execute_command))
        .route("/listen/:channel/:session_id", get(handlers::listen::listen))
}
