//! Live output over server-sent events

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};

use crate::api::ApiError;
use crate::models::ChannelKind;
use crate::AppState;

/// Stream every payload published on a session channel
///
/// Dropping the response stream, which axum does when the client goes away,
/// drops the subscription and unsubscribes it.
pub async fn listen(
    State(state): State<Arc<AppState>>,
    Path((channel, session_id)): Path<(ChannelKind, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.gateway.subscribe(&session_id, channel).await?;
    let events = subscription.map(|payload| Ok(Event::default().data(normalize_newlines(payload))));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// SSE data cannot carry a bare `\r`; fold CRLF and CR into LF
fn normalize_newlines(payload: String) -> String {
    if !payload.contains('\r') {
        return payload;
    }
    payload.replace("\r\n", "\n").replace('\r', "\n")
}
