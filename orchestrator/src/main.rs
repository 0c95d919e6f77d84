//! Shellcast orchestrator - session-scoped container terminals
//!
//! This is the main entry point for the orchestrator service.
//! It drives docker/podman containers and serves the terminal API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use shellcast_orchestrator::api::{create_router, mark_started};
use shellcast_orchestrator::config::{AppConfig, BrokerKind};
use shellcast_orchestrator::container::{CliRuntime, ContainerRuntime};
use shellcast_orchestrator::logging::init_logging;
use shellcast_orchestrator::relay::{Broker, MemoryBroker, RedisBroker};
use shellcast_orchestrator::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    mark_started();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level, &config.log_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Shellcast orchestrator"
    );

    // Initialize metrics system
    let metrics = match shellcast_orchestrator::metrics::init_metrics() {
        Ok(handle) => {
            info!("Prometheus metrics initialized");
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    // Container runtime
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(CliRuntime::detect(&config.environment).await?);

    // Broker for live output and the output log
    let broker: Arc<dyn Broker> = match config.broker.kind {
        BrokerKind::Redis => {
            let broker = RedisBroker::connect(&config.broker.redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.broker.redis_url))?;
            info!(redis_url = %config.broker.redis_url, "Redis broker connected");
            Arc::new(broker)
        }
        BrokerKind::Memory => {
            info!("In-memory broker initialized");
            Arc::new(MemoryBroker::new())
        }
    };

    // Create shared application state
    let state = Arc::new(AppState::new(config.clone(), runtime, broker, metrics));

    // Idle session sweeper
    if let Some(idle_timeout) = config.sessions.idle_timeout_seconds {
        info!(
            idle_timeout_seconds = idle_timeout,
            sweep_interval_seconds = config.sessions.sweep_interval_seconds,
            "Idle session expiry enabled"
        );
        let sweep_state = state.clone();
        let period = Duration::from_secs(config.sessions.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let expired = sweep_state.sweep_idle_sessions().await;
                if expired > 0 {
                    info!(expired, "Idle sessions expired");
                }
            }
        });
    }

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "Listening on");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");

    if config.environment.remove_on_shutdown {
        warn!("Removing all session environments...");
        state.containers.remove_all().await;
    }

    info!("Shellcast orchestrator stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
