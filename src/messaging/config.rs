//! Messaging configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Connection name reported to the server
    pub connection_name: String,

    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            connection_name: "broker-ui".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

/// RabbitMQ configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RabbitMqConfig {
    /// Prefix of generated consumer tags
    pub consumer_tag_prefix: String,

    /// Handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            consumer_tag_prefix: "broker-ui".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Client ID
    pub client_id: String,

    /// Message timeout in milliseconds
    pub message_timeout_ms: u64,

    /// Metadata fetch timeout in milliseconds (connect and partition lookup)
    pub metadata_timeout_ms: u64,

    /// Producer flush timeout on close, in milliseconds
    pub flush_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            client_id: "broker-ui".to_string(),
            message_timeout_ms: 30000,
            metadata_timeout_ms: 5000,
            flush_timeout_ms: 5000,
        }
    }
}

/// Google Cloud Pub/Sub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// REST endpoint used for non-emulator URLs
    pub endpoint: String,

    /// Project used when nothing else resolves one
    pub default_project: String,

    /// Messages requested per pull
    pub max_messages: u32,

    /// HTTP request timeout in milliseconds; pulls are long-polls bounded by this
    pub request_timeout_ms: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://pubsub.googleapis.com".to_string(),
            default_project: "dev-local".to_string(),
            max_messages: 10,
            request_timeout_ms: 30000,
        }
    }
}

/// Per-provider settings handed to the factory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub nats: NatsConfig,
    pub rabbitmq: RabbitMqConfig,
    pub kafka: KafkaConfig,
    pub pubsub: PubSubConfig,

    /// Upper bound on client teardown during close, in milliseconds
    pub close_timeout_ms: u64,
}

impl ProviderSettings {
    pub fn close_timeout(&self) -> Duration {
        if self.close_timeout_ms == 0 {
            Duration::from_secs(5)
        } else {
            Duration::from_millis(self.close_timeout_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ProviderSettings::default();
        assert_eq!(settings.nats.connection_name, "broker-ui");
        assert_eq!(settings.pubsub.default_project, "dev-local");
        assert_eq!(settings.close_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings: ProviderSettings = settings_from_json(serde_json::json!({
            "kafka": { "client_id": "desk" },
            "close_timeout_ms": 250
        }));
        assert_eq!(settings.kafka.client_id, "desk");
        assert_eq!(settings.kafka.flush_timeout_ms, 5000);
        assert_eq!(settings.close_timeout(), Duration::from_millis(250));
    }

    fn settings_from_json(value: serde_json::Value) -> ProviderSettings {
        serde_json::from_value(value).unwrap()
    }
}
