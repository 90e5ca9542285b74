//! Persistence for server, topic and subscription records

pub mod factory;
pub mod sled_store;
pub mod store;

pub use factory::{create_in_memory_repository, create_repository};
pub use sled_store::SledRepository;
pub use store::InMemoryRepository;

use crate::error::Result;
use crate::models::{NewServer, NewSubscription, NewTopic, Server, Subscription, Topic};
use async_trait::async_trait;

/// Trait for server record storage
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// Persist a new server and return it with its assigned id
    async fn save_server(&self, server: NewServer) -> Result<Server>;

    /// Replace an existing server record
    async fn update_server(&self, server: &Server) -> Result<()>;

    /// All servers ordered by id
    async fn get_all_servers(&self) -> Result<Vec<Server>>;

    async fn get_server(&self, id: u64) -> Result<Option<Server>>;

    /// Delete a server together with its topics and subscriptions
    async fn delete_server(&self, id: u64) -> Result<()>;
}

/// Trait for topic record storage; `(name, server_id)` is unique
#[async_trait]
pub trait TopicRepository: Send + Sync {
    async fn save_topic(&self, topic: NewTopic) -> Result<Topic>;

    async fn get_topics_by_server(&self, server_id: u64) -> Result<Vec<Topic>>;

    async fn delete_topic(&self, name: &str, server_id: u64) -> Result<()>;
}

/// Trait for subscription record storage; `(name, server_id)` is unique
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn save_subscription(&self, subscription: NewSubscription) -> Result<Subscription>;

    async fn get_subscriptions_by_server(&self, server_id: u64) -> Result<Vec<Subscription>>;

    async fn delete_subscription(&self, name: &str, server_id: u64) -> Result<()>;
}

/// Everything the services need from storage
pub trait Repository: ServerRepository + TopicRepository + SubscriptionRepository {}

impl<T> Repository for T where T: ServerRepository + TopicRepository + SubscriptionRepository {}
