//! Broker-agnostic messaging
//!
//! One [`MessagingProvider`] contract over heterogeneous brokers. Each adapter
//! translates its native delivery primitive into [`MessageHandler`] calls.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │     ProviderFactory      │
//!            │  ProviderType → adapter  │
//!            └────────────┬─────────────┘
//!                         ▼
//!            ┌──────────────────────────┐
//!            │  dyn MessagingProvider   │
//!            │ connect / publish /      │
//!            │ subscribe / unsubscribe  │
//!            └────────────┬─────────────┘
//!       ┌──────────┬──────┴─────┬───────────┬──────────┐
//!       ▼          ▼            ▼           ▼          ▼
//!     NATS     RabbitMQ       Kafka      Pub/Sub    in-memory
//! ```
//!
//! Every subscription is served by its own cancellable delivery task.
//!
//! # Example
//!
//! ```no_run
//! use broker_ui::messaging::{MessageHandler, ProviderFactory, ProviderType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = ProviderFactory::default();
//!     let provider = factory.create_provider(ProviderType::Nats)?;
//!     provider.connect("nats://localhost:4222").await?;
//!
//!     let handler: MessageHandler = Arc::new(|subject: &str, payload: &[u8]| {
//!         println!("[{}] {}", subject, String::from_utf8_lossy(payload));
//!     });
//!     provider.subscribe("orders.>", handler).await?;
//!     provider.publish("orders.new", b"hello").await?;
//!
//!     provider.close().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod delivery;
mod error;
mod factory;
mod kafka;
mod memory;
mod metrics;
mod nats;
mod pubsub;
mod rabbitmq;
mod traits;

pub use config::{KafkaConfig, NatsConfig, ProviderSettings, PubSubConfig, RabbitMqConfig};
pub use error::{MessagingError, MessagingResult};
pub use factory::{detect_provider_from_url, parse_provider_type, ProviderConstructor, ProviderFactory};
pub use kafka::{bootstrap_servers, KafkaProvider};
pub use memory::{subject_matches, InMemoryBroker, InMemoryProvider};
pub use metrics::{init_messaging_metrics, MessagingMetrics, MESSAGING_METRICS};
pub use nats::NatsProvider;
pub use pubsub::{
    is_emulator_url, resolve_target, resolve_target_with_env, subscription_name, AccessTokenSource,
    DefaultCredentials, PubSubProvider, PubSubTarget,
};
pub use rabbitmq::{normalize_amqp_url, RabbitMqProvider};
pub use traits::{MessageHandler, MessagingProvider, ProviderType};
