//! Execution stream capture
//!
//! Drains a command's raw output stream to completion and renders it into
//! text and HTML. Capture is all-or-nothing: a stream error discards every
//! byte received so far.

pub mod ansi;

use std::io;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::models::ExecutionOutput;

/// Accumulate all chunks in arrival order, then finalize them
pub async fn capture<S>(stream: S) -> io::Result<ExecutionOutput>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    futures::pin_mut!(stream);

    let mut buffer = Vec::new();
    let mut chunks = 0usize;
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
        chunks += 1;
    }

    debug!(chunks, bytes = buffer.len(), "Output stream completed");
    Ok(render_output(&buffer))
}

/// Decode captured bytes and render their HTML form
pub fn render_output(bytes: &[u8]) -> ExecutionOutput {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let html = ansi::to_html(&text);
    ExecutionOutput { text, html }
}
