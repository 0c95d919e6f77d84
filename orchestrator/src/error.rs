//! Domain errors for terminal sessions, environments and output relay

use thiserror::Error;

/// Failures surfaced by an execute or subscribe call
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Unknown or expired session id
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// The execution image could not be built; no binding was recorded
    #[error("Environment image build failed: {0}")]
    EnvironmentBuild(String),

    /// The container could not be created or started; no binding was recorded
    #[error("Environment creation failed: {0}")]
    EnvironmentCreate(String),

    /// The command or its output stream failed; the environment stays bound
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl TerminalError {
    /// Whether the caller can fix this by changing the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TerminalError::InvalidSession(_) | TerminalError::CommandExecution(_)
        )
    }
}

/// Broker failures. The relay logs these and carries on.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Publish to {channel} failed: {message}")]
    Publish { channel: String, message: String },

    #[error("Append to {channel} failed: {message}")]
    Append { channel: String, message: String },

    #[error("Subscribe to {channel} failed: {message}")]
    Subscribe { channel: String, message: String },

    #[error("Unsubscribe from {channel} failed: {message}")]
    Unsubscribe { channel: String, message: String },
}

impl RelayError {
    /// Short operation name used in logs and metric labels
    pub fn operation(&self) -> &'static str {
        match self {
            RelayError::Publish { .. } => "publish",
            RelayError::Append { .. } => "append",
            RelayError::Subscribe { .. } => "subscribe",
            RelayError::Unsubscribe { .. } => "unsubscribe",
        }
    }
}
