//! Output relay
//!
//! Publishes the outcome of each execution on `terminal:<session>:<stdout|stderr>`
//! and appends the same payload to the log stored under that key.

mod broker;
mod memory;
mod redis_broker;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

pub use broker::{Broker, Subscription, SubscriptionHandle};
#[cfg(test)]
pub use broker::MockBroker;
pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;

use crate::error::TerminalError;
use crate::models::{ChannelKind, ExecutionOutput};

/// Channel key shared by publishers, subscribers and the output log
pub fn channel_key(session_id: &str, kind: ChannelKind) -> String {
    format!("terminal:{}:{}", session_id, kind.as_str())
}

#[derive(Serialize)]
struct OutputPayload<'a> {
    command: &'a str,
    output: &'a ExecutionOutput,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    command: &'a str,
    error: String,
}

/// Build the channel and serialized payload for one execution result
pub fn payload_for(
    session_id: &str,
    command: &str,
    result: &Result<ExecutionOutput, TerminalError>,
) -> (String, serde_json::Result<String>) {
    match result {
        Ok(output) => (
            channel_key(session_id, ChannelKind::Stdout),
            serde_json::to_string(&OutputPayload { command, output }),
        ),
        Err(err) => (
            channel_key(session_id, ChannelKind::Stderr),
            serde_json::to_string(&ErrorPayload {
                command,
                error: err.to_string(),
            }),
        ),
    }
}

/// Publishes execution results and appends them to the output log
#[derive(Clone)]
pub struct OutputRelay {
    broker: Arc<dyn Broker>,
}

impl OutputRelay {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Relay one result. Broker failures are logged and never returned.
    pub async fn relay(
        &self,
        session_id: &str,
        command: &str,
        result: &Result<ExecutionOutput, TerminalError>,
    ) {
        let (channel, payload) = payload_for(session_id, command, result);
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Failed to serialize relay payload");
                return;
            }
        };

        // Both are attempted regardless of the other's outcome
        let published = self.broker.publish(&channel, &payload).await;
        let appended = self.broker.append(&channel, &payload).await;

        let mut ok = true;
        for failure in [published.err(), appended.err()].into_iter().flatten() {
            ok = false;
            crate::metrics::record_relay_failure(failure.operation());
            warn!(
                session_id = %session_id,
                channel = %channel,
                op = failure.operation(),
                error = %failure,
                "Relay failed"
            );
        }

        if ok {
            debug!(session_id = %session_id, channel = %channel, bytes = payload.len(), "Output relayed");
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::RelayError;

    fn hello() -> ExecutionOutput {
        ExecutionOutput {
            text: "hello\n".into(),
            html: "hello\n".into(),
        }
    }

    #[test]
    fn test_channel_key_format() {
        assert_eq!(channel_key("abc", ChannelKind::Stdout), "terminal:abc:stdout");
        assert_eq!(channel_key("abc", ChannelKind::Stderr), "terminal:abc:stderr");
    }

    #[test]
    fn test_payload_shapes() {
        let (channel, payload) = payload_for("s1", "echo hello", &Ok(hello()));
        assert_eq!(channel, "terminal:s1:stdout");
        assert_eq!(
            payload.unwrap(),
            r#"{"command":"echo hello","output":{"text":"hello\n","html":"hello\n"}}"#
        );

        let failure = Err(TerminalError::CommandExecution("exit status 125".into()));
        let (channel, payload) = payload_for("s1", "bogus", &failure);
        assert_eq!(channel, "terminal:s1:stderr");
        assert_eq!(
            payload.unwrap(),
            r#"{"command":"bogus","error":"Command execution failed: exit status 125"}"#
        );
    }

    #[tokio::test]
    async fn test_relay_publishes_and_appends_same_payload() {
        let broker = Arc::new(MemoryBroker::default());
        let relay = OutputRelay::new(broker.clone());
        let mut subscription = broker.subscribe("terminal:s1:stdout").await.unwrap();

        relay.relay("s1", "echo hello", &Ok(hello())).await;

        let published = subscription.next().await.unwrap();
        assert_eq!(broker.log("terminal:s1:stdout").await, Some(published.clone()));
        let value: serde_json::Value = serde_json::from_str(&published).unwrap();
        assert_eq!(value["command"], "echo hello");
        assert_eq!(value["output"]["text"], "hello\n");
    }

    #[tokio::test]
    async fn test_sequential_results_publish_in_order() {
        let broker = Arc::new(MemoryBroker::default());
        let relay = OutputRelay::new(broker.clone());
        let mut subscription = broker.subscribe("terminal:s1:stdout").await.unwrap();

        relay.relay("s1", "c1", &Ok(hello())).await;
        relay.relay("s1", "c2", &Ok(hello())).await;

        let first: serde_json::Value =
            serde_json::from_str(&subscription.next().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&subscription.next().await.unwrap()).unwrap();
        assert_eq!(first["command"], "c1");
        assert_eq!(second["command"], "c2");
    }

    #[tokio::test]
    async fn test_append_still_attempted_when_publish_fails() {
        let mut broker = MockBroker::new();
        broker
            .expect_publish()
            .times(1)
            .returning(|channel, _| {
                Err(RelayError::Publish {
                    channel: channel.to_string(),
                    message: "connection refused".into(),
                })
            });
        broker
            .expect_append()
            .withf(|channel, _| channel == "terminal:s1:stderr")
            .times(1)
            .returning(|_, _| Ok(()));

        let relay = OutputRelay::new(Arc::new(broker));
        relay
            .relay(
                "s1",
                "false",
                &Err(TerminalError::CommandExecution("stream closed".into())),
            )
            .await;
    }

    #[tokio::test]
    async fn test_publish_still_attempted_when_append_fails() {
        let mut broker = MockBroker::new();
        broker.expect_publish().times(1).returning(|_, _| Ok(()));
        broker.expect_append().times(1).returning(|channel, _| {
            Err(RelayError::Append {
                channel: channel.to_string(),
                message: "READONLY".into(),
            })
        });

        let relay = OutputRelay::new(Arc::new(broker));
        relay.relay("s1", "ls", &Ok(hello())).await;
    }
}
