//! Streaming gateway
//!
//! Hands live channel subscriptions to clients. A subscription unsubscribes
//! from the broker when it is closed or dropped, so a client disconnect
//! tears it down without the transport having to do anything.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::Stream;
use tracing::{debug, info, warn};

use crate::error::{RelayError, TerminalError};
use crate::models::ChannelKind;
use crate::relay::{channel_key, Broker, SubscriptionHandle};
use crate::session::SessionRegistry;

pub struct StreamingGateway {
    sessions: Arc<SessionRegistry>,
    broker: Arc<dyn Broker>,
}

impl StreamingGateway {
    pub fn new(sessions: Arc<SessionRegistry>, broker: Arc<dyn Broker>) -> Self {
        Self { sessions, broker }
    }

    /// Subscribe to one of a session's output channels
    pub async fn subscribe(
        &self,
        session_id: &str,
        kind: ChannelKind,
    ) -> Result<OutputSubscription, TerminalError> {
        if !self.sessions.touch(session_id).await {
            warn!(session_id = %session_id, channel = %kind, "Subscribe to unknown session");
            return Err(TerminalError::InvalidSession(session_id.to_string()));
        }

        let channel = channel_key(session_id, kind);
        let (handle, messages) = self.broker.subscribe(&channel).await?.into_parts();

        crate::metrics::subscription_opened();
        info!(session_id = %session_id, channel = %channel, subscription = %handle.id, "Client subscribed");

        Ok(OutputSubscription {
            handle: Some(handle),
            messages,
            broker: self.broker.clone(),
        })
    }
}

/// Live feed of one channel's payloads, in publish order
pub struct OutputSubscription {
    handle: Option<SubscriptionHandle>,
    messages: BoxStream<'static, String>,
    broker: Arc<dyn Broker>,
}

impl OutputSubscription {
    pub fn channel(&self) -> Option<&str> {
        self.handle.as_ref().map(|handle| handle.channel.as_str())
    }

    /// Unsubscribe now and report the broker's answer
    pub async fn close(mut self) -> Result<(), RelayError> {
        match self.handle.take() {
            Some(handle) => {
                crate::metrics::subscription_closed();
                self.broker.unsubscribe(handle).await
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for OutputSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSubscription")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Stream for OutputSubscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.messages.as_mut().poll_next(cx)
    }
}

impl Drop for OutputSubscription {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        crate::metrics::subscription_closed();

        let broker = self.broker.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let channel = handle.channel.clone();
                    let id = handle.id;
                    match broker.unsubscribe(handle).await {
                        Ok(()) => debug!(channel = %channel, subscription = %id, "Client unsubscribed"),
                        Err(e) => warn!(channel = %channel, subscription = %id, error = %e, "Unsubscribe failed"),
                    }
                });
            }
            Err(_) => warn!(
                channel = %handle.channel,
                subscription = %handle.id,
                "No runtime to unsubscribe on"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use tokio::sync::oneshot;

    use super::*;
    use crate::relay::{MemoryBroker, MockBroker, Subscription};

    async fn gateway_with_memory() -> (StreamingGateway, Arc<MemoryBroker>, String) {
        let sessions = Arc::new(SessionRegistry::new());
        let session_id = sessions.create_session().await;
        let broker = Arc::new(MemoryBroker::default());
        (StreamingGateway::new(sessions, broker.clone()), broker, session_id)
    }

    async fn wait_for_subscribers(broker: &MemoryBroker, channel: &str, expected: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.subscriber_count(channel).await != expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let (gateway, broker, _) = gateway_with_memory().await;
        let err = gateway.subscribe("missing", ChannelKind::Stdout).await.unwrap_err();
        assert!(matches!(err, TerminalError::InvalidSession(_)));
        assert_eq!(broker.subscriber_count("terminal:missing:stdout").await, 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_each_event_in_order() {
        let (gateway, broker, session_id) = gateway_with_memory().await;
        let channel = format!("terminal:{}:stdout", session_id);

        let mut first = gateway.subscribe(&session_id, ChannelKind::Stdout).await.unwrap();
        let mut second = gateway.subscribe(&session_id, ChannelKind::Stdout).await.unwrap();
        assert_eq!(first.channel(), Some(channel.as_str()));

        broker.publish(&channel, "one").await.unwrap();
        broker.publish(&format!("terminal:{}:stderr", session_id), "elsewhere").await.unwrap();
        broker.publish(&channel, "two").await.unwrap();

        for subscription in [&mut first, &mut second] {
            assert_eq!(subscription.next().await.as_deref(), Some("one"));
            assert_eq!(subscription.next().await.as_deref(), Some("two"));
        }
    }

    #[tokio::test]
    async fn test_drop_unsubscribes_from_exact_channel() {
        let sessions = Arc::new(SessionRegistry::new());
        let session_id = sessions.create_session().await;
        let expected = format!("terminal:{}:stderr", session_id);

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let mut broker = MockBroker::new();
        broker.expect_subscribe().times(1).returning(|channel| {
            Ok(Subscription::new(
                SubscriptionHandle::new(channel),
                futures::stream::pending().boxed(),
            ))
        });
        let key = expected.clone();
        broker
            .expect_unsubscribe()
            .withf(move |handle| handle.channel == key)
            .times(1)
            .returning(move |handle| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(handle.channel);
                }
                Ok(())
            });

        let gateway = StreamingGateway::new(sessions, Arc::new(broker));
        let subscription = gateway
            .subscribe(&session_id, ChannelKind::Stderr)
            .await
            .unwrap();
        drop(subscription);

        let unsubscribed = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unsubscribed, expected);
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let (gateway, broker, session_id) = gateway_with_memory().await;
        let channel = format!("terminal:{}:stderr", session_id);

        let mut kept = gateway.subscribe(&session_id, ChannelKind::Stderr).await.unwrap();
        let dropped = gateway.subscribe(&session_id, ChannelKind::Stderr).await.unwrap();
        assert_eq!(broker.subscriber_count(&channel).await, 2);

        drop(dropped);
        wait_for_subscribers(&broker, &channel, 1).await;

        broker.publish(&channel, "after").await.unwrap();
        assert_eq!(kept.next().await.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_close_reports_unsubscribe() {
        let (gateway, broker, session_id) = gateway_with_memory().await;
        let channel = format!("terminal:{}:stdout", session_id);

        let subscription = gateway.subscribe(&session_id, ChannelKind::Stdout).await.unwrap();
        subscription.close().await.unwrap();
        assert_eq!(broker.subscriber_count(&channel).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_failure_is_only_logged() {
        let mut broker = MockBroker::new();
        broker.expect_subscribe().returning(|channel| {
            Ok(Subscription::new(
                SubscriptionHandle::new(channel),
                futures::stream::pending().boxed(),
            ))
        });
        broker.expect_unsubscribe().returning(|handle| {
            Err(RelayError::Unsubscribe {
                channel: handle.channel,
                message: "connection closed".into(),
            })
        });

        let sessions = Arc::new(SessionRegistry::new());
        let session_id = sessions.create_session().await;
        let gateway = StreamingGateway::new(sessions, Arc::new(broker));

        let subscription = gateway.subscribe(&session_id, ChannelKind::Stdout).await.unwrap();
        drop(subscription);
        tokio::task::yield_now().await;
    }
}
