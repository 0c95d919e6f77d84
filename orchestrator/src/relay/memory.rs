//! In-process broker with one unbounded queue per subscriber

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;
use uuid::Uuid;

use super::broker::{Broker, Subscription, SubscriptionHandle};
use crate::error::RelayError;

/// Live subscribers of one channel
type Topic = HashMap<Uuid, mpsc::UnboundedSender<String>>;

/// Broker for single-process deployments and tests
///
/// Every subscriber has its own queue, so a slow reader never loses
/// messages published after it subscribed. The output log is kept as one
/// concatenated string per channel, the same shape Redis APPEND produces.
#[derive(Default)]
pub struct MemoryBroker {
    topics: RwLock<HashMap<String, Topic>>,
    logs: RwLock<HashMap<String, String>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current subscriber count for a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.topics
            .read()
            .await
            .get(channel)
            .map(|topic| topic.len())
            .unwrap_or(0)
    }

    /// Everything appended to a channel's log so far
    pub async fn log(&self, channel: &str) -> Option<String> {
        self.logs.read().await.get(channel).cloned()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RelayError> {
        let topics = self.topics.read().await;
        match topics.get(channel) {
            Some(topic) => {
                // A closed queue belongs to a dropped stream awaiting unsubscribe
                let delivered = topic
                    .values()
                    .filter(|sender| sender.send(payload.to_string()).is_ok())
                    .count();
                debug!(channel = %channel, delivered, "Published");
            }
            None => debug!(channel = %channel, "Published with no subscribers"),
        }
        Ok(())
    }

    async fn append(&self, channel: &str, payload: &str) -> Result<(), RelayError> {
        self.logs
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push_str(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RelayError> {
        let handle = SubscriptionHandle::new(channel);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.topics
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .insert(handle.id, sender);

        debug!(channel = %channel, subscription = %handle.id, "Subscribed");
        Ok(Subscription::new(
            handle,
            UnboundedReceiverStream::new(receiver).boxed(),
        ))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RelayError> {
        let mut topics = self.topics.write().await;
        let removed = topics
            .get_mut(&handle.channel)
            .and_then(|topic| topic.remove(&handle.id))
            .is_some();

        if !removed {
            return Err(RelayError::Unsubscribe {
                channel: handle.channel,
                message: format!("unknown subscription {}", handle.id),
            });
        }

        if topics
            .get(&handle.channel)
            .is_some_and(|topic| topic.is_empty())
        {
            topics.remove(&handle.channel);
        }

        debug!(channel = %handle.channel, subscription = %handle.id, "Unsubscribed");
        Ok(())
    }
}
