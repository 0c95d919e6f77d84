//! Session handlers

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::SessionResponse;
use crate::AppState;

/// Issue a new terminal session
pub async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let session_id = state.sessions.create_session().await;
    Json(SessionResponse { session_id })
}
