//! Redis broker: PUBLISH/SUBSCRIBE for live output, APPEND for the log

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broker::{Broker, Subscription, SubscriptionHandle};
use crate::error::RelayError;

type StopReply = oneshot::Sender<Result<(), RelayError>>;

/// Broker backed by a Redis server
///
/// Publishing and appending share one managed connection. Every subscription
/// owns a dedicated pub/sub connection driven by a background task.
pub struct RedisBroker {
    client: redis::Client,
    connection: redis::aio::ConnectionManager,
    subscriptions: Mutex<HashMap<Uuid, oneshot::Sender<StopReply>>>,
}

impl RedisBroker {
    /// Connect to Redis
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Failed to create Redis client")?;

        let connection = redis::aio::ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to Redis")?;

        info!(redis_url = %url, "Connected to Redis");
        Ok(Self {
            client,
            connection,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RelayError> {
        let mut conn = self.connection.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| RelayError::Publish {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        debug!(channel = %channel, receivers, "Redis PUBLISH");
        Ok(())
    }

    async fn append(&self, channel: &str, payload: &str) -> Result<(), RelayError> {
        let mut conn = self.connection.clone();
        let length: i64 = conn
            .append(channel, payload)
            .await
            .map_err(|e| RelayError::Append {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        debug!(channel = %channel, length, "Redis APPEND");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, RelayError> {
        let subscribe_error = |e: redis::RedisError| RelayError::Subscribe {
            channel: channel.to_string(),
            message: e.to_string(),
        };

        let mut pubsub = self
            .client
            .get_async_connection()
            .await
            .map_err(subscribe_error)?
            .into_pubsub();
        pubsub.subscribe(channel).await.map_err(subscribe_error)?;

        let handle = SubscriptionHandle::new(channel);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<StopReply>();
        self.subscriptions.lock().await.insert(handle.id, stop_tx);

        let key = channel.to_string();
        tokio::spawn(async move {
            let reply = {
                let messages = pubsub.on_message();
                tokio::pin!(messages);
                loop {
                    tokio::select! {
                        reply = &mut stop_rx => break reply.ok(),
                        message = messages.next() => match message {
                            Some(message) => match message.get_payload::<String>() {
                                Ok(payload) => {
                                    if message_tx.send(payload).is_err() {
                                        break None;
                                    }
                                }
                                Err(e) => warn!(channel = %key, error = %e, "Dropping non-text payload"),
                            },
                            None => {
                                warn!(channel = %key, "Redis pub/sub connection closed");
                                break None;
                            }
                        },
                    }
                }
            };

            let result = pubsub
                .unsubscribe(&key)
                .await
                .map_err(|e| RelayError::Unsubscribe {
                    channel: key.clone(),
                    message: e.to_string(),
                });

            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!(error = %e, "Redis UNSUBSCRIBE failed");
                    }
                }
            }
        });

        debug!(channel = %channel, subscription = %handle.id, "Redis SUBSCRIBE");
        Ok(Subscription::new(
            handle,
            UnboundedReceiverStream::new(message_rx).boxed(),
        ))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RelayError> {
        let Some(stop) = self.subscriptions.lock().await.remove(&handle.id) else {
            return Err(RelayError::Unsubscribe {
                channel: handle.channel,
                message: format!("unknown subscription {}", handle.id),
            });
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if stop.send(reply_tx).is_err() {
            // The forwarding task already ended and unsubscribed on its own
            debug!(channel = %handle.channel, "Subscription already closed");
            return Ok(());
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }
}
