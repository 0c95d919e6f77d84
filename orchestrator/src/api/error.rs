//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::error::TerminalError;
use crate::models::ErrorResponse;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::InvalidSession(_) => (StatusCode::BAD_REQUEST, "INVALID_SESSION"),
            ApiError::ExecutionFailed(_) => (StatusCode::UNPROCESSABLE_ENTITY, "EXECUTION_FAILED"),
            ApiError::EnvironmentUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ENVIRONMENT_UNAVAILABLE")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse::new(error_code, self.to_string()));
        (status, body).into_response()
    }
}

impl From<TerminalError> for ApiError {
    fn from(err: TerminalError) -> Self {
        if !err.is_client_error() {
            tracing::error!(error = %err, "Terminal request failed");
        }

        match err {
            TerminalError::InvalidSession(id) => ApiError::InvalidSession(id),
            TerminalError::CommandExecution(msg) => ApiError::ExecutionFailed(msg),
            TerminalError::EnvironmentBuild(_) | TerminalError::EnvironmentCreate(_) => {
                ApiError::EnvironmentUnavailable(err.to_string())
            }
            TerminalError::Relay(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Internal error");
        ApiError::Internal(err.to_string())
    }
}
