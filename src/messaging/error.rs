//! Error types for messaging operations

use crate::messaging::traits::ProviderType;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Handshake or dial failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted before connect or after close
    #[error("Not connected to {0} server")]
    NotConnected(ProviderType),

    /// The exact subject pattern already has a handler on this provider
    #[error("Already subscribed to subject pattern: {0}")]
    AlreadySubscribed(String),

    /// The subject pattern was never subscribed on this provider
    #[error("No subscription found for subject pattern: {0}")]
    NotSubscribed(String),

    /// Unknown provider tag
    #[error("Unsupported provider type: {0}")]
    UnsupportedProvider(String),

    /// Provider tag without a working adapter
    #[error("{0} provider not implemented yet")]
    NotImplemented(ProviderType),

    /// Publish failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe failed
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// One or more teardown steps failed; every step was still attempted
    #[error("Errors closing {provider} connection: {}", .failures.join("; "))]
    CloseFailed {
        provider: ProviderType,
        failures: Vec<String>,
    },
}

impl MessagingError {
    /// True for errors raised because the provider has no live connection
    pub fn is_not_connected(&self) -> bool {
        matches!(self, MessagingError::NotConnected(_))
    }
}
