use crate::error::{AppError, Result};
use crate::models::{NewServer, NewSubscription, NewTopic, Server, Subscription, Topic};
use crate::state::{ServerRepository, SubscriptionRepository, TopicRepository};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use std::path::Path;
use std::sync::Arc;
use validator::Validate;

/// Persistent repository using the Sled embedded database.
///
/// Servers are keyed by big-endian id. Topics and subscriptions are keyed by
/// `server_id ++ name`, which makes `(name, server_id)` unique and lets a
/// prefix scan list everything belonging to one server.
#[derive(Clone)]
pub struct SledRepository {
    db: Arc<Db>,
    servers_tree: sled::Tree,
    topics_tree: sled::Tree,
    subscriptions_tree: sled::Tree,
}

impl SledRepository {
    /// Open (or create) a repository at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|e| {
            AppError::Database(format!("Failed to open Sled database: {}", e))
        })?;

        let servers_tree = db.open_tree("servers").map_err(|e| {
            AppError::Database(format!("Failed to open servers tree: {}", e))
        })?;

        let topics_tree = db.open_tree("topics").map_err(|e| {
            AppError::Database(format!("Failed to open topics tree: {}", e))
        })?;

        let subscriptions_tree = db.open_tree("subscriptions").map_err(|e| {
            AppError::Database(format!("Failed to open subscriptions tree: {}", e))
        })?;

        tracing::info!("Initialized Sled repository at {:?}", path_ref);

        Ok(Self {
            db: Arc::new(db),
            servers_tree,
            topics_tree,
            subscriptions_tree,
        })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| {
            AppError::Database(format!("Failed to flush database: {}", e))
        })?;
        Ok(())
    }

    /// Next id; sled ids start at zero, records start at one
    fn generate_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    fn server_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn named_key(server_id: u64, name: &str) -> Vec<u8> {
        let mut key = server_id.to_be_bytes().to_vec();
        key.extend_from_slice(name.as_bytes());
        key
    }

    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| {
            AppError::Serialization(format!("Failed to serialize record: {}", e))
        })
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| {
            AppError::Serialization(format!("Failed to deserialize record: {}", e))
        })
    }

    fn require_server(&self, server_id: u64) -> Result<()> {
        if self.servers_tree.contains_key(Self::server_key(server_id))? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Server {} not found", server_id)))
        }
    }

    /// Insert only if the key is absent; false when it already exists
    fn insert_new(tree: &sled::Tree, key: Vec<u8>, value: Vec<u8>) -> Result<bool> {
        let swapped = tree.compare_and_swap(key, None as Option<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }

    fn scan_server<T: DeserializeOwned>(tree: &sled::Tree, server_id: u64) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in tree.scan_prefix(Self::server_key(server_id)) {
            let (_, value) = item?;
            records.push(Self::deserialize(&value)?);
        }
        Ok(records)
    }

    fn remove_server_prefix(tree: &sled::Tree, server_id: u64) -> Result<usize> {
        let keys = tree
            .scan_prefix(Self::server_key(server_id))
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for key in &keys {
            tree.remove(key)?;
        }
        Ok(keys.len())
    }
}

#[async_trait]
impl ServerRepository for SledRepository {
    async fn save_server(&self, server: NewServer) -> Result<Server> {
        let server = server.trimmed();
        server.validate()?;
        let server = Server::from_new(self.generate_id()?, server);

        self.servers_tree
            .insert(Self::server_key(server.id), Self::serialize(&server)?)?;

        tracing::debug!(server_id = server.id, "Server saved");
        Ok(server)
    }

    async fn update_server(&self, server: &Server) -> Result<()> {
        server.validate()?;
        let key = Self::server_key(server.id);

        if !self.servers_tree.contains_key(key)? {
            return Err(AppError::NotFound(format!("Server {} not found", server.id)));
        }

        self.servers_tree.insert(key, Self::serialize(server)?)?;

        tracing::debug!(server_id = server.id, "Server updated");
        Ok(())
    }

    async fn get_all_servers(&self) -> Result<Vec<Server>> {
        let mut servers = Vec::new();
        for item in self.servers_tree.iter() {
            let (_, value) = item?;
            servers.push(Self::deserialize::<Server>(&value)?);
        }
        // big-endian keys already iterate in id order
        Ok(servers)
    }

    async fn get_server(&self, id: u64) -> Result<Option<Server>> {
        match self.servers_tree.get(Self::server_key(id))? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_server(&self, id: u64) -> Result<()> {
        if self.servers_tree.remove(Self::server_key(id))?.is_none() {
            return Err(AppError::NotFound(format!("Server {} not found", id)));
        }

        let topics = Self::remove_server_prefix(&self.topics_tree, id)?;
        let subscriptions = Self::remove_server_prefix(&self.subscriptions_tree, id)?;

        tracing::debug!(server_id = id, topics, subscriptions, "Server deleted");
        Ok(())
    }
}

#[async_trait]
impl TopicRepository for SledRepository {
    async fn save_topic(&self, topic: NewTopic) -> Result<Topic> {
        topic.validate()?;
        self.require_server(topic.server_id)?;

        let topic = Topic::from_new(self.generate_id()?, topic);
        let key = Self::named_key(topic.server_id, &topic.name);

        if !Self::insert_new(&self.topics_tree, key, Self::serialize(&topic)?)? {
            return Err(AppError::Conflict(format!(
                "Topic {} already exists on server {}",
                topic.name, topic.server_id
            )));
        }
        Ok(topic)
    }

    async fn get_topics_by_server(&self, server_id: u64) -> Result<Vec<Topic>> {
        let mut topics: Vec<Topic> = Self::scan_server(&self.topics_tree, server_id)?;
        topics.sort_by_key(|topic| topic.id);
        Ok(topics)
    }

    async fn delete_topic(&self, name: &str, server_id: u64) -> Result<()> {
        match self.topics_tree.remove(Self::named_key(server_id, name))? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!(
                "Topic {} not found on server {}",
                name, server_id
            ))),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for SledRepository {
    async fn save_subscription(&self, subscription: NewSubscription) -> Result<Subscription> {
        subscription.validate()?;
        self.require_server(subscription.server_id)?;

        let subscription = Subscription::from_new(self.generate_id()?, subscription);
        let key = Self::named_key(subscription.server_id, &subscription.name);

        if !Self::insert_new(&self.subscriptions_tree, key, Self::serialize(&subscription)?)? {
            return Err(AppError::Conflict(format!(
                "Subscription {} already exists on server {}",
                subscription.name, subscription.server_id
            )));
        }
        Ok(subscription)
    }

    async fn get_subscriptions_by_server(&self, server_id: u64) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> =
            Self::scan_server(&self.subscriptions_tree, server_id)?;
        subscriptions.sort_by_key(|subscription| subscription.id);
        Ok(subscriptions)
    }

    async fn delete_subscription(&self, name: &str, server_id: u64) -> Result<()> {
        match self.subscriptions_tree.remove(Self::named_key(server_id, name))? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!(
                "Subscription {} not found on server {}",
                name, server_id
            ))),
        }
    }
}
