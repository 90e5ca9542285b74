use crate::error::{AppError, Result};
use crate::messaging::{MessagingProvider, ProviderFactory, ProviderType};
use crate::models::{NewServer, Server, Subscription, Topic};
use crate::state::{Repository, ServerRepository, SubscriptionRepository, TopicRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use validator::Validate;

/// Server records plus the registry of live connections, keyed by server id.
///
/// A provider instance belongs to exactly one server id. Connecting an id that
/// already has a live provider fails with [`AppError::AlreadyConnected`].
pub struct ServerService {
    repository: Arc<dyn Repository>,
    factory: ProviderFactory,
    connections: RwLock<HashMap<u64, Arc<dyn MessagingProvider>>>,
}

impl ServerService {
    /// Create a new server service
    pub fn new(repository: Arc<dyn Repository>, factory: ProviderFactory) -> Self {
        Self {
            repository,
            factory,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &ProviderFactory {
        &self.factory
    }

    /// Provider types the configured factory can build
    pub fn supported_providers(&self) -> Vec<ProviderType> {
        self.factory.supported_providers()
    }

    pub async fn get_all_servers(&self) -> Result<Vec<Server>> {
        self.repository.get_all_servers().await
    }

    pub async fn get_server(&self, id: u64) -> Result<Server> {
        self.repository
            .get_server(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Server {} not found", id)))
    }

    pub async fn save_server(&self, server: NewServer) -> Result<Server> {
        let server = server.trimmed();
        server.validate()?;
        let server = self.repository.save_server(server).await?;
        info!(server_id = server.id, name = %server.name, provider = %server.provider_type, "Server saved");
        Ok(server)
    }

    /// Edit a stored server; a live connection keeps the old settings until reconnect
    pub async fn update_server(&self, id: u64, update: NewServer) -> Result<Server> {
        let update = update.trimmed();
        update.validate()?;
        let mut server = self.get_server(id).await?;
        server.apply(update);
        self.repository.update_server(&server).await?;

        if self.connections.read().await.contains_key(&id) {
            debug!(server_id = id, "Updated server is connected; changes apply on reconnect");
        }
        Ok(server)
    }

    /// Close any live connection, then delete the server with its topics and
    /// subscriptions. A failed close is logged; the record is deleted anyway.
    pub async fn delete_server(&self, id: u64) -> Result<()> {
        if let Err(e) = self.disconnect_from_server(id).await {
            warn!(server_id = id, error = %e, "Failed to close connection of deleted server");
        }
        self.repository.delete_server(id).await?;
        info!(server_id = id, "Server deleted");
        Ok(())
    }

    pub async fn get_topics_for_server(&self, server_id: u64) -> Result<Vec<Topic>> {
        self.repository.get_topics_by_server(server_id).await
    }

    pub async fn get_subscriptions_for_server(&self, server_id: u64) -> Result<Vec<Subscription>> {
        self.repository.get_subscriptions_by_server(server_id).await
    }

    /// Create a provider for the server's type, connect it and register it.
    ///
    /// Nothing is registered when validation, construction or the connection
    /// attempt fails.
    pub async fn connect_to_server(&self, server: &Server) -> Result<Arc<dyn MessagingProvider>> {
        server.validate()?;

        if self.connections.read().await.contains_key(&server.id) {
            return Err(AppError::AlreadyConnected(server.id));
        }

        let provider = self.factory.create_provider(server.provider_type)?;
        provider.connect(&server.url).await?;

        let mut connections = self.connections.write().await;
        if connections.contains_key(&server.id) {
            drop(connections);
            // lost a race with a concurrent connect for the same id
            if let Err(e) = provider.close().await {
                warn!(server_id = server.id, error = %e, "Failed to close duplicate connection");
            }
            return Err(AppError::AlreadyConnected(server.id));
        }
        connections.insert(server.id, provider.clone());

        info!(
            server_id = server.id,
            provider = %server.provider_type,
            url = %server.url,
            "Connected to server"
        );
        Ok(provider)
    }

    /// Look up the stored server and connect to it
    pub async fn connect_by_id(&self, id: u64) -> Result<Arc<dyn MessagingProvider>> {
        let server = self.get_server(id).await?;
        self.connect_to_server(&server).await
    }

    /// Close and forget the server's connection; no-op when not connected
    pub async fn disconnect_from_server(&self, id: u64) -> Result<()> {
        let provider = self.connections.write().await.remove(&id);

        let Some(provider) = provider else {
            debug!(server_id = id, "Server not connected; nothing to disconnect");
            return Ok(());
        };

        provider.close().await?;
        info!(server_id = id, "Disconnected from server");
        Ok(())
    }

    /// Close every live connection, attempting all of them
    pub async fn disconnect_all(&self) -> Result<()> {
        let providers: Vec<(u64, Arc<dyn MessagingProvider>)> =
            self.connections.write().await.drain().collect();

        let mut first_error = None;
        for (id, provider) in providers {
            if let Err(e) = provider.close().await {
                warn!(server_id = id, error = %e, "Failed to close connection");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub async fn get_messaging_provider(&self, id: u64) -> Option<Arc<dyn MessagingProvider>> {
        self.connections.read().await.get(&id).cloned()
    }

    /// True when a provider is registered and reports a live connection
    pub async fn is_connected(&self, id: u64) -> bool {
        match self.get_messaging_provider(id).await {
            Some(provider) => provider.is_connected().await,
            None => false,
        }
    }

    /// Ids with a registered provider, ascending
    pub async fn connected_server_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.connections.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
