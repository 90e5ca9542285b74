//! NATS provider implementation

use crate::messaging::config::NatsConfig;
use crate::messaging::delivery::DeliveryTask;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics;
use crate::messaging::traits::{MessageHandler, MessagingProvider, ProviderType};
use async_nats::connection::State;
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

const PROVIDER: &str = "NATS";

#[derive(Default)]
struct NatsState {
    client: Option<Client>,
    url: Option<String>,
    subscriptions: HashMap<String, DeliveryTask>,
}

/// Subject-based pub/sub over a single NATS connection.
///
/// Wildcards (`*`, `>`) are passed to the server verbatim. Delivery is
/// at-most-once; there is no ack or redelivery at this layer.
pub struct NatsProvider {
    config: NatsConfig,
    close_timeout: Duration,
    state: RwLock<NatsState>,
}

impl NatsProvider {
    /// Create a new, unconnected NATS provider
    pub fn new(config: NatsConfig, close_timeout: Duration) -> Self {
        Self {
            config,
            close_timeout,
            state: RwLock::new(NatsState::default()),
        }
    }

    /// URL of the live connection, if any
    pub async fn url(&self) -> Option<String> {
        self.state.read().await.url.clone()
    }
}

#[async_trait]
impl MessagingProvider for NatsProvider {
    async fn connect(&self, url: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.client.is_some() {
            tracing::debug!(url = %url, "NATS provider already connected");
            return Ok(());
        }

        let client = async_nats::ConnectOptions::new()
            .name(&self.config.connection_name)
            .connection_timeout(Duration::from_millis(self.config.connect_timeout_ms))
            .connect(url)
            .await
            .map_err(|e| {
                MessagingError::ConnectionFailed(format!(
                    "failed to connect to NATS server at {}: {}",
                    url, e
                ))
            })?;

        state.client = Some(client);
        state.url = Some(url.to_string());
        metrics::connection_opened(PROVIDER);

        tracing::info!(url = %url, "Connected to NATS server");
        Ok(())
    }

    async fn publish(&self, subject: &str, data: &[u8]) -> MessagingResult<()> {
        let state = self.state.read().await;
        let client = state
            .client
            .as_ref()
            .ok_or(MessagingError::NotConnected(ProviderType::Nats))?;

        let result = client
            .publish(subject.to_string(), data.to_vec().into())
            .await
            .map_err(|e| {
                MessagingError::PublishFailed(format!(
                    "failed to publish message to subject {}: {}",
                    subject, e
                ))
            });
        metrics::record_publish(PROVIDER, &result);
        result?;

        tracing::debug!(subject = %subject, bytes = data.len(), "Published NATS message");
        Ok(())
    }

    async fn subscribe(&self, subject_pattern: &str, handler: MessageHandler) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        let client = state
            .client
            .clone()
            .ok_or(MessagingError::NotConnected(ProviderType::Nats))?;

        if state.subscriptions.contains_key(subject_pattern) {
            return Err(MessagingError::AlreadySubscribed(subject_pattern.to_string()));
        }

        let mut subscriber = client
            .subscribe(subject_pattern.to_string())
            .await
            .map_err(|e| {
                MessagingError::SubscribeFailed(format!(
                    "failed to subscribe to subject pattern {}: {}",
                    subject_pattern, e
                ))
            })?;

        let pattern = subject_pattern.to_string();
        let task = DeliveryTask::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        if let Err(e) = subscriber.unsubscribe().await {
                            tracing::warn!(pattern = %pattern, error = %e, "Failed to unsubscribe NATS subscription");
                        }
                        break;
                    }
                    message = subscriber.next() => match message {
                        Some(message) => {
                            metrics::record_received(PROVIDER);
                            handler(&message.subject[..], &message.payload[..]);
                        }
                        None => {
                            tracing::debug!(pattern = %pattern, "NATS subscription stream ended");
                            break;
                        }
                    }
                }
            }
        });

        state.subscriptions.insert(subject_pattern.to_string(), task);

        tracing::info!(pattern = %subject_pattern, "Subscribed to NATS subject pattern");
        Ok(())
    }

    async fn unsubscribe(&self, subject_pattern: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.client.is_none() {
            return Err(MessagingError::NotConnected(ProviderType::Nats));
        }

        let task = state
            .subscriptions
            .remove(subject_pattern)
            .ok_or_else(|| MessagingError::NotSubscribed(subject_pattern.to_string()))?;
        task.stop();

        tracing::info!(pattern = %subject_pattern, "Unsubscribed from NATS subject pattern");
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        let Some(client) = state.client.take() else {
            return Ok(());
        };

        for (pattern, task) in state.subscriptions.drain() {
            task.stop();
            tracing::debug!(pattern = %pattern, "Stopped NATS subscription");
        }

        match tokio::time::timeout(self.close_timeout, client.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to flush NATS client on close"),
            Err(_) => tracing::warn!("Timed out flushing NATS client on close"),
        }
        drop(client);

        state.url = None;
        metrics::connection_closed(PROVIDER);

        tracing::info!("Disconnected from NATS server");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let state = self.state.read().await;
        match state.client.as_ref() {
            Some(client) => !matches!(client.connection_state(), State::Disconnected),
            None => false,
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Nats
    }
}
