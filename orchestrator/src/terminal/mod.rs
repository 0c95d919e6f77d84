//! Terminal command execution
//!
//! Runs one request end to end: validate the session, resolve its
//! environment, capture the command's output and relay the result.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::capture;
use crate::container::ContainerManager;
use crate::error::TerminalError;
use crate::models::{ExecutionOutput, ExecutionRequest};
use crate::relay::OutputRelay;
use crate::session::SessionRegistry;

pub struct TerminalService {
    sessions: Arc<SessionRegistry>,
    containers: Arc<ContainerManager>,
    relay: OutputRelay,
}

impl TerminalService {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        containers: Arc<ContainerManager>,
        relay: OutputRelay,
    ) -> Self {
        Self {
            sessions,
            containers,
            relay,
        }
    }

    /// Run a command and return its captured output
    ///
    /// Every result except an invalid session is also relayed to the
    /// session's channels. Relay failures never change the returned result.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutput, TerminalError> {
        if !self.sessions.touch(&request.session_id).await {
            warn!(session_id = %request.session_id, user_id = %request.user.id, "Execute on unknown session");
            crate::metrics::record_execution("invalid_session", 0.0);
            return Err(TerminalError::InvalidSession(request.session_id.clone()));
        }

        let started = Instant::now();
        let result = self.run(request).await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(_) => "success",
            Err(TerminalError::CommandExecution(_)) => "execution_failed",
            Err(_) => "environment_failed",
        };
        crate::metrics::record_execution(outcome, elapsed.as_secs_f64());

        match &result {
            Ok(output) => info!(
                session_id = %request.session_id,
                user_id = %request.user.id,
                bytes = output.text.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Command completed"
            ),
            Err(e) => warn!(
                session_id = %request.session_id,
                user_id = %request.user.id,
                error = %e,
                "Command failed"
            ),
        }

        self.relay
            .relay(&request.session_id, &request.command, &result)
            .await;

        result
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionOutput, TerminalError> {
        let raw = self
            .containers
            .execute(&request.user, &request.session_id, &request.command)
            .await?;

        capture::capture(raw)
            .await
            .map_err(|e| TerminalError::CommandExecution(e.to_string()))
    }
}
