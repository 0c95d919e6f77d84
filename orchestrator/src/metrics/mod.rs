//! Prometheus metrics export
//!
//! Counters are no-ops until [`init_metrics`] installs the recorder.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::AppState;

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("shellcast_execution_duration_seconds".to_string()),
            &[0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0],
        )
        .context("Invalid histogram buckets")?
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

pub fn record_session_created() {
    counter!("shellcast_sessions_created_total").increment(1);
}

pub fn record_sessions_expired(count: usize) {
    counter!("shellcast_sessions_expired_total").increment(count as u64);
}

pub fn record_image_build(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("shellcast_image_builds_total", "outcome" => outcome).increment(1);
}

pub fn record_environment_created() {
    counter!("shellcast_environments_created_total").increment(1);
}

/// Record a finished execute call
pub fn record_execution(outcome: &'static str, duration_secs: f64) {
    counter!("shellcast_executions_total", "outcome" => outcome).increment(1);
    histogram!("shellcast_execution_duration_seconds", "outcome" => outcome).record(duration_secs);
}

pub fn record_relay_failure(operation: &'static str) {
    counter!("shellcast_relay_failures_total", "op" => operation).increment(1);
}

pub fn subscription_opened() {
    gauge!("shellcast_active_subscriptions").increment(1.0);
}

pub fn subscription_closed() {
    gauge!("shellcast_active_subscriptions").decrement(1.0);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    gauge!("shellcast_active_sessions").set(state.sessions.count().await as f64);
    gauge!("shellcast_bound_environments").set(state.containers.environment_count().await as f64);

    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("Content-Type", "text/plain; version=0.0.4")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}
