//! Provider construction and URL-based provider detection

use crate::messaging::config::ProviderSettings;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::kafka::KafkaProvider;
use crate::messaging::nats::NatsProvider;
use crate::messaging::pubsub::PubSubProvider;
use crate::messaging::rabbitmq::RabbitMqProvider;
use crate::messaging::traits::{MessagingProvider, ProviderType};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use strum::IntoEnumIterator;

/// Builds a fresh, unconnected provider
pub type ProviderConstructor = Arc<dyn Fn() -> Arc<dyn MessagingProvider> + Send + Sync>;

/// Maps a [`ProviderType`] to the constructor of its adapter.
///
/// Types without a registered constructor (Redis by default) are refused with
/// [`MessagingError::NotImplemented`].
#[derive(Clone)]
pub struct ProviderFactory {
    constructors: HashMap<ProviderType, ProviderConstructor>,
}

impl ProviderFactory {
    /// Factory with the built-in NATS, RabbitMQ, Kafka and Pub/Sub adapters
    pub fn new(settings: ProviderSettings) -> Self {
        let close_timeout = settings.close_timeout();
        let mut factory = Self::empty();

        let nats = settings.nats.clone();
        factory.register(ProviderType::Nats, move || {
            Arc::new(NatsProvider::new(nats.clone(), close_timeout)) as Arc<dyn MessagingProvider>
        });

        let rabbitmq = settings.rabbitmq.clone();
        factory.register(ProviderType::RabbitMq, move || {
            Arc::new(RabbitMqProvider::new(rabbitmq.clone(), close_timeout))
                as Arc<dyn MessagingProvider>
        });

        let kafka = settings.kafka.clone();
        factory.register(ProviderType::Kafka, move || {
            Arc::new(KafkaProvider::new(kafka.clone(), close_timeout)) as Arc<dyn MessagingProvider>
        });

        let pubsub = settings.pubsub.clone();
        factory.register(ProviderType::PubSub, move || {
            Arc::new(PubSubProvider::new(pubsub.clone())) as Arc<dyn MessagingProvider>
        });

        factory
    }

    /// Factory with no constructors at all
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register (or replace) the constructor for a provider type
    pub fn register<F>(&mut self, provider_type: ProviderType, constructor: F)
    where
        F: Fn() -> Arc<dyn MessagingProvider> + Send + Sync + 'static,
    {
        self.constructors.insert(provider_type, Arc::new(constructor));
    }

    /// Create an unconnected provider for `provider_type`
    pub fn create_provider(
        &self,
        provider_type: ProviderType,
    ) -> MessagingResult<Arc<dyn MessagingProvider>> {
        let constructor = self
            .constructors
            .get(&provider_type)
            .ok_or(MessagingError::NotImplemented(provider_type))?;
        Ok(constructor())
    }

    /// Provider types with a working adapter, in declaration order
    pub fn supported_providers(&self) -> Vec<ProviderType> {
        ProviderType::iter()
            .filter(|provider_type| self.constructors.contains_key(provider_type))
            .collect()
    }

    pub fn is_supported(&self, provider_type: ProviderType) -> bool {
        self.constructors.contains_key(&provider_type)
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new(ProviderSettings::default())
    }
}

/// Parse a stored or user-supplied provider name
pub fn parse_provider_type(value: &str) -> MessagingResult<ProviderType> {
    ProviderType::from_str(value.trim())
        .map_err(|_| MessagingError::UnsupportedProvider(value.to_string()))
}

/// Guess the provider type from a connection URL.
///
/// Falls back to NATS when nothing matches.
pub fn detect_provider_from_url(url: &str) -> ProviderType {
    let url = url.trim().to_lowercase();

    if url.starts_with("nats://") || url.contains(":4222") {
        return ProviderType::Nats;
    }
    if url.starts_with("amqp://") || url.starts_with("amqps://") || url.contains(":5672") {
        return ProviderType::RabbitMq;
    }
    if url.starts_with("kafka://") || url.contains(":9092") {
        return ProviderType::Kafka;
    }
    if url.starts_with("gcp://") || url.contains(":8085") || url.contains("pubsub") {
        return ProviderType::PubSub;
    }
    if looks_like_project_id(&url) {
        return ProviderType::PubSub;
    }

    ProviderType::Nats
}

fn looks_like_project_id(value: &str) -> bool {
    !value.contains(':') && !value.contains('/') && (4..=63).contains(&value.len())
}
