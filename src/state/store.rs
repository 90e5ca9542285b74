use crate::error::{AppError, Result};
use crate::models::{NewServer, NewSubscription, NewTopic, Server, Subscription, Topic};
use crate::state::{ServerRepository, SubscriptionRepository, TopicRepository};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use validator::Validate;

type NameKey = (u64, String);

/// In-memory repository (for tests and throwaway sessions)
#[derive(Clone)]
pub struct InMemoryRepository {
    servers: Arc<DashMap<u64, Server>>,
    topics: Arc<DashMap<NameKey, Topic>>,
    subscriptions: Arc<DashMap<NameKey, Subscription>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(DashMap::new()),
            topics: Arc::new(DashMap::new()),
            subscriptions: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn generate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn require_server(&self, server_id: u64) -> Result<()> {
        if self.servers.contains_key(&server_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Server {} not found", server_id)))
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerRepository for InMemoryRepository {
    async fn save_server(&self, server: NewServer) -> Result<Server> {
        let server = server.trimmed();
        server.validate()?;
        let server = Server::from_new(self.generate_id(), server);
        self.servers.insert(server.id, server.clone());

        tracing::debug!(server_id = server.id, "Server saved");
        Ok(server)
    }

    async fn update_server(&self, server: &Server) -> Result<()> {
        server.validate()?;
        match self.servers.get_mut(&server.id) {
            Some(mut entry) => {
                *entry = server.clone();
                tracing::debug!(server_id = server.id, "Server updated");
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Server {} not found", server.id))),
        }
    }

    async fn get_all_servers(&self) -> Result<Vec<Server>> {
        let mut servers: Vec<Server> = self.servers.iter().map(|entry| entry.value().clone()).collect();
        servers.sort_by_key(|server| server.id);
        Ok(servers)
    }

    async fn get_server(&self, id: u64) -> Result<Option<Server>> {
        Ok(self.servers.get(&id).map(|entry| entry.clone()))
    }

    async fn delete_server(&self, id: u64) -> Result<()> {
        if self.servers.remove(&id).is_none() {
            return Err(AppError::NotFound(format!("Server {} not found", id)));
        }

        self.topics.retain(|(server_id, _), _| *server_id != id);
        self.subscriptions.retain(|(server_id, _), _| *server_id != id);

        tracing::debug!(server_id = id, "Server deleted");
        Ok(())
    }
}

#[async_trait]
impl TopicRepository for InMemoryRepository {
    async fn save_topic(&self, topic: NewTopic) -> Result<Topic> {
        topic.validate()?;
        self.require_server(topic.server_id)?;

        let key = (topic.server_id, topic.name.trim().to_string());
        match self.topics.entry(key) {
            Entry::Occupied(entry) => Err(AppError::Conflict(format!(
                "Topic {} already exists on server {}",
                entry.key().1,
                entry.key().0
            ))),
            Entry::Vacant(entry) => {
                let topic = Topic::from_new(self.generate_id(), topic);
                entry.insert(topic.clone());
                Ok(topic)
            }
        }
    }

    async fn get_topics_by_server(&self, server_id: u64) -> Result<Vec<Topic>> {
        let mut topics: Vec<Topic> = self
            .topics
            .iter()
            .filter(|entry| entry.key().0 == server_id)
            .map(|entry| entry.value().clone())
            .collect();
        topics.sort_by_key(|topic| topic.id);
        Ok(topics)
    }

    async fn delete_topic(&self, name: &str, server_id: u64) -> Result<()> {
        self.topics
            .remove(&(server_id, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| {
                AppError::NotFound(format!("Topic {} not found on server {}", name, server_id))
            })
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryRepository {
    async fn save_subscription(&self, subscription: NewSubscription) -> Result<Subscription> {
        subscription.validate()?;
        self.require_server(subscription.server_id)?;

        let key = (subscription.server_id, subscription.name.trim().to_string());
        match self.subscriptions.entry(key) {
            Entry::Occupied(entry) => Err(AppError::Conflict(format!(
                "Subscription {} already exists on server {}",
                entry.key().1,
                entry.key().0
            ))),
            Entry::Vacant(entry) => {
                let subscription = Subscription::from_new(self.generate_id(), subscription);
                entry.insert(subscription.clone());
                Ok(subscription)
            }
        }
    }

    async fn get_subscriptions_by_server(&self, server_id: u64) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.key().0 == server_id)
            .map(|entry| entry.value().clone())
            .collect();
        subscriptions.sort_by_key(|subscription| subscription.id);
        Ok(subscriptions)
    }

    async fn delete_subscription(&self, name: &str, server_id: u64) -> Result<()> {
        self.subscriptions
            .remove(&(server_id, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Subscription {} not found on server {}",
                    name, server_id
                ))
            })
    }
}
