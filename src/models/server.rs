use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::messaging::ProviderType;

/// A broker server the user can connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Server {
    /// Repository-assigned identifier
    pub id: u64,

    /// Display name
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// Connection URL, interpreted by the provider adapter
    #[validate(length(min = 1))]
    pub url: String,

    /// Broker technology; absent values load as NATS
    #[serde(default)]
    pub provider_type: ProviderType,

    pub created_at: DateTime<Utc>,
}

impl Server {
    /// Materialize a record from user input under `id`
    pub fn from_new(id: u64, new: NewServer) -> Self {
        Self {
            id,
            name: new.name.trim().to_string(),
            url: new.url.trim().to_string(),
            provider_type: new.provider_type,
            created_at: Utc::now(),
        }
    }

    /// Apply edited fields, keeping identity and creation time
    pub fn apply(&mut self, update: NewServer) {
        self.name = update.name.trim().to_string();
        self.url = update.url.trim().to_string();
        self.provider_type = update.provider_type;
    }
}

/// User input for creating or editing a server
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewServer {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(min = 1))]
    pub url: String,

    #[serde(default)]
    pub provider_type: ProviderType,
}

impl NewServer {
    pub fn new(name: impl Into<String>, url: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            provider_type,
        }
    }

    /// Input with surrounding whitespace removed; validate this, not the raw input
    pub fn trimmed(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            url: self.url.trim().to_string(),
            provider_type: self.provider_type,
        }
    }
}
