//! Topic/subscription message bus abstraction.
//!
//! The pipeline needs three broker behaviours: competing-consumer
//! subscriptions with at-least-once delivery (`user-messages`,
//! `message-completed`), per-session serialised fan-in for token fragments
//! (`token-streams`), and dead-lettering after repeated failures. Two
//! implementations are provided: [`redis::RedisBus`] on Redis Streams and
//! [`memory::MemoryBus`] for in-process tests.

pub mod consumer;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures::Stream;
use serde::{de::DeserializeOwned, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus backend error: {0}")]
    Backend(#[from] ::redis::RedisError),

    #[error("bus serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed bus entry: {0}")]
    Malformed(String),
}

/// A message published to a topic. `session_id`, when present, additionally
/// routes the message to the per-session stream of that topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub message_id: String,
    pub session_id: Option<String>,
    pub body: String,
}

impl BusMessage {
    pub fn json<T: Serialize>(
        message_id: &str,
        session_id: Option<&str>,
        payload: &T,
    ) -> Result<Self, BusError> {
        Ok(Self {
            message_id: message_id.to_string(),
            session_id: session_id.map(|s| s.to_string()),
            body: serde_json::to_string(payload)?,
        })
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Backend-specific settle token carried inside a [`Delivery`].
#[derive(Debug, Clone)]
pub(crate) enum DeliveryToken {
    Redis { entry_id: String },
    Memory { seq: u64 },
}

/// One received message plus the handle needed to settle it.
#[derive(Debug)]
pub struct Delivery {
    pub message: BusMessage,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    pub(crate) token: DeliveryToken,
}

#[async_trait]
pub trait TopicPublisher: Send + Sync {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError>;
}

/// Competing-consumer receiver bound to one `(topic, subscription)`.
///
/// `receive` also performs redelivery of messages abandoned (or orphaned) by
/// other consumers, and moves messages past the maximum delivery count to the
/// subscription's dead-letter store.
#[async_trait]
pub trait SubscriptionReceiver: Send + Sync {
    async fn receive(&self, max_messages: usize, wait: Duration)
        -> Result<Vec<Delivery>, BusError>;

    async fn complete(&self, delivery: &Delivery) -> Result<(), BusError>;

    async fn abandon(&self, delivery: &Delivery) -> Result<(), BusError>;
}

/// Ordered replayable stream of one session's messages on a topic.
pub type SessionStream = Pin<Box<dyn Stream<Item = Result<BusMessage, BusError>> + Send>>;

#[async_trait]
pub trait MessageBus: TopicPublisher {
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Arc<dyn SubscriptionReceiver>, BusError>;

    /// Open a session receiver. Delivery starts from the beginning of the
    /// retained session stream, so a subscriber that connects after
    /// publication replays what it missed.
    async fn open_session(&self, topic: &str, session_id: &str) -> Result<SessionStream, BusError>;
}
