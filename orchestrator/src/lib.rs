//! Shellcast orchestrator library
//!
//! Session-scoped container terminals: each (user, session) pair gets one
//! long-lived container, commands run inside it, and their output is
//! published to live subscribers and appended to a per-channel log.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

pub mod api;
pub mod capture;
pub mod config;
pub mod container;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod relay;
pub mod session;
pub mod terminal;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub sessions: Arc<session::SessionRegistry>,
    pub containers: Arc<container::ContainerManager>,
    pub terminal: terminal::TerminalService,
    pub gateway: gateway::StreamingGateway,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the terminal core on top of a container runtime and a broker
    pub fn new(
        config: config::AppConfig,
        runtime: Arc<dyn container::ContainerRuntime>,
        broker: Arc<dyn relay::Broker>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let sessions = Arc::new(session::SessionRegistry::new());
        let containers = Arc::new(container::ContainerManager::new(
            runtime,
            config.environment.clone(),
        ));
        let terminal = terminal::TerminalService::new(
            sessions.clone(),
            containers.clone(),
            relay::OutputRelay::new(broker.clone()),
        );
        let gateway = gateway::StreamingGateway::new(sessions.clone(), broker);

        Self {
            config,
            sessions,
            containers,
            terminal,
            gateway,
            metrics,
        }
    }

    /// Expire idle sessions and release their environments
    pub async fn sweep_idle_sessions(&self) -> usize {
        let Some(idle_timeout) = self.config.idle_timeout() else {
            return 0;
        };

        let expired = self.sessions.expire_idle(idle_timeout).await;
        for session_id in &expired {
            self.containers.release_session(session_id).await;
        }
        expired.len()
    }
}
