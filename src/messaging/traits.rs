//! Messaging trait abstractions

use crate::messaging::error::MessagingResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Callback invoked with `(subject, payload)` for every inbound message.
///
/// Handlers run on the provider's delivery tasks and must not block for long;
/// they are invoked in broker delivery order within one subscription.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Broker technology behind a server record
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ProviderType {
    /// Subject-based pub/sub
    #[default]
    #[serde(rename = "NATS")]
    #[strum(serialize = "NATS")]
    Nats,
    /// Durable queues over AMQP 0-9-1
    #[serde(rename = "RabbitMQ")]
    #[strum(serialize = "RabbitMQ")]
    RabbitMq,
    /// Partitioned log
    #[serde(rename = "Kafka")]
    #[strum(serialize = "Kafka")]
    Kafka,
    /// Google Cloud Pub/Sub (or its emulator)
    #[serde(rename = "PubSub")]
    #[strum(serialize = "PubSub")]
    PubSub,
    /// Declared but without an adapter
    #[serde(rename = "Redis")]
    #[strum(serialize = "Redis")]
    Redis,
}

/// Normalized capability set every broker adapter implements.
///
/// All methods take `&self`; adapters guard their state with a single
/// `tokio::sync::RwLock`, write-locked for `connect`, `subscribe`,
/// `unsubscribe` and `close`, read-locked for `publish` and `is_connected`.
/// Publish only needs a read lock since it never touches the subscription map.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Establish the connection. A no-op while already connected.
    async fn connect(&self, url: &str) -> MessagingResult<()>;

    /// Send `data` to `subject`
    async fn publish(&self, subject: &str, data: &[u8]) -> MessagingResult<()>;

    /// Register `handler` for `subject_pattern`. Fails if the exact pattern is
    /// already registered on this instance.
    async fn subscribe(&self, subject_pattern: &str, handler: MessageHandler) -> MessagingResult<()>;

    /// Stop delivery for `subject_pattern`
    async fn unsubscribe(&self, subject_pattern: &str) -> MessagingResult<()>;

    /// Cancel every subscription and release the client. Safe to call twice.
    async fn close(&self) -> MessagingResult<()>;

    /// Local connected flag combined with the client's own liveness
    async fn is_connected(&self) -> bool;

    /// Tag of this adapter
    fn provider_type(&self) -> ProviderType;
}
