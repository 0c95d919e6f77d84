//! Command execution handler

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::api::ApiError;
use crate::models::{ExecutionOutput, ExecutionRequest};
use crate::AppState;

/// Run a command in the caller's session environment
pub async fn execute_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionOutput>, ApiError> {
    if request.command.trim().is_empty() {
        return Err(ApiError::BadRequest("Command cannot be empty".into()));
    }

    let output = state.terminal.execute(&request).await?;
    Ok(Json(output))
}
