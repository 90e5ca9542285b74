use crate::messaging::ProviderSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where server, topic and subscription records live
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-broker adapter settings
    #[serde(default)]
    pub providers: ProviderSettings,

    #[serde(default)]
    pub service: ServiceConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, an optional file and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("BROKER_UI_CONFIG").unwrap_or_else(|_| "broker-ui.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: BROKER_UI__)
            .add_source(
                config::Environment::with_prefix("BROKER_UI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse a TOML document layered over the embedded defaults
    pub fn from_toml(contents: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: StorageBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Capacity of channels handed to subscribe for UI forwarding
    #[serde(default = "default_delivery_channel_capacity")]
    pub delivery_channel_capacity: usize,

    /// Dashboard snapshot interval (milliseconds)
    #[serde(default = "default_dashboard_refresh_ms")]
    pub dashboard_refresh_ms: u64,
}

impl ServiceConfig {
    pub fn dashboard_refresh(&self) -> Duration {
        Duration::from_millis(self.dashboard_refresh_ms.max(1))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            delivery_channel_capacity: default_delivery_channel_capacity(),
            dashboard_refresh_ms: default_dashboard_refresh_ms(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_delivery_channel_capacity() -> usize {
    256
}

fn default_dashboard_refresh_ms() -> u64 {
    1000
}
