//! Pub/sub and append-log seam

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::Stream;
use uuid::Uuid;

use crate::error::RelayError;

/// Identifies one subscription so it can be torn down later
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub channel: String,
    pub id: Uuid,
}

impl SubscriptionHandle {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            id: Uuid::new_v4(),
        }
    }
}

/// A live feed of payloads published on one channel after subscribing
pub struct Subscription {
    pub handle: SubscriptionHandle,
    messages: BoxStream<'static, String>,
}

impl Subscription {
    pub fn new(handle: SubscriptionHandle, messages: BoxStream<'static, String>) -> Self {
        Self { handle, messages }
    }

    pub fn into_parts(self) -> (SubscriptionHandle, BoxStream<'static, String>) {
        (self.handle, self.messages)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.messages.as_mut().poll_next(cx)
    }
}

/// Message broker carrying terminal output
///
/// Publishing to a channel nobody listens on is not an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliver a payload to every current subscriber of `channel`
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RelayError>;

    /// Append a payload to the durable log stored under `channel`
    async fn append(&self, channel: &str, payload: &str) -> Result<(), RelayError>;

    /// Start receiving payloads published on `channel` from now on
    async fn subscribe(&self, channel: &str) -> Result<Subscription, RelayError>;

    /// Stop a subscription returned by [`Broker::subscribe`]
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RelayError>;
}
