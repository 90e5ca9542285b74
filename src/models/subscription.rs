use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A named subscriber on a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: u64,
    pub server_id: u64,
    /// Key for received history and dashboard counters
    pub name: String,
    /// Pattern handed to the provider's subscribe
    pub subject_pattern: String,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn from_new(id: u64, new: NewSubscription) -> Self {
        Self {
            id,
            server_id: new.server_id,
            name: new.name.trim().to_string(),
            subject_pattern: new.subject_pattern.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSubscription {
    pub server_id: u64,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1))]
    pub subject_pattern: String,
}

impl NewSubscription {
    pub fn new(server_id: u64, name: impl Into<String>, subject_pattern: impl Into<String>) -> Self {
        Self {
            server_id,
            name: name.into(),
            subject_pattern: subject_pattern.into(),
        }
    }
}
