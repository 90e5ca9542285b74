use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A named publishing target on a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: u64,
    pub server_id: u64,
    /// Subject, routing key, Kafka topic or Pub/Sub topic
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    pub fn from_new(id: u64, new: NewTopic) -> Self {
        Self {
            id,
            server_id: new.server_id,
            name: new.name.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewTopic {
    pub server_id: u64,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

impl NewTopic {
    pub fn new(server_id: u64, name: impl Into<String>) -> Self {
        Self {
            server_id,
            name: name.into(),
        }
    }
}
