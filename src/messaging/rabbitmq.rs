//! RabbitMQ provider implementation
//!
//! Queue-based: every subject is a durable queue on the default exchange.
//! Publishing declares the queue named after the routing key; subscribing
//! declares the queue named after the pattern and starts an auto-ack consumer
//! drained by one delivery task.

use crate::messaging::config::RabbitMqConfig;
use crate::messaging::delivery::DeliveryTask;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics;
use crate::messaging::traits::{MessageHandler, MessagingProvider, ProviderType};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

const PROVIDER: &str = "RabbitMQ";

/// AMQP delivery mode for messages that survive a broker restart
const PERSISTENT: u8 = 2;

struct AmqpSubscription {
    queue: String,
    consumer_tag: String,
    task: DeliveryTask,
}

#[derive(Default)]
struct RabbitMqState {
    connection: Option<Connection>,
    channel: Option<Channel>,
    url: Option<String>,
    /// Cleared by the broker error callbacks of the current connection
    alive: Arc<AtomicBool>,
    subscriptions: HashMap<String, AmqpSubscription>,
}

/// RabbitMQ provider over one AMQP connection and channel.
///
/// Connection and channel errors reported by the broker clear the liveness
/// flag; there is no automatic reconnect, callers re-invoke `connect` after
/// `close`.
pub struct RabbitMqProvider {
    config: RabbitMqConfig,
    close_timeout: Duration,
    state: RwLock<RabbitMqState>,
}

impl RabbitMqProvider {
    /// Create a new, unconnected RabbitMQ provider
    pub fn new(config: RabbitMqConfig, close_timeout: Duration) -> Self {
        Self {
            config,
            close_timeout,
            state: RwLock::new(RabbitMqState::default()),
        }
    }

    fn consumer_tag(&self) -> String {
        format!("{}-{}", self.config.consumer_tag_prefix, Uuid::new_v4())
    }
}

/// Prefix `amqp://` unless the URL already names an AMQP scheme
pub fn normalize_amqp_url(url: &str) -> String {
    if url.starts_with("amqp://") || url.starts_with("amqps://") {
        url.to_string()
    } else {
        format!("amqp://{}", url)
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

#[async_trait]
impl MessagingProvider for RabbitMqProvider {
    async fn connect(&self, url: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.connection.is_some() {
            tracing::debug!(url = %url, "RabbitMQ provider already connected");
            return Ok(());
        }

        let connection_url = normalize_amqp_url(url);
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let connection = tokio::time::timeout(
            connect_timeout,
            Connection::connect(&connection_url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            MessagingError::ConnectionFailed(format!(
                "timed out connecting to RabbitMQ at {}",
                url
            ))
        })?
        .map_err(|e| MessagingError::ConnectionFailed(format!("failed to connect to RabbitMQ: {}", e)))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(0, "channel open failed").await {
                    tracing::debug!(error = %close_err, "Failed to close RabbitMQ connection after channel error");
                }
                return Err(MessagingError::ConnectionFailed(format!(
                    "failed to open channel: {}",
                    e
                )));
            }
        };

        let alive = Arc::new(AtomicBool::new(true));

        let connection_alive = alive.clone();
        connection.on_error(move |err| {
            tracing::error!(error = %err, "RabbitMQ connection error");
            connection_alive.store(false, Ordering::SeqCst);
        });

        let channel_alive = alive.clone();
        channel.on_error(move |err| {
            tracing::error!(error = %err, "RabbitMQ channel error");
            channel_alive.store(false, Ordering::SeqCst);
        });

        state.connection = Some(connection);
        state.channel = Some(channel);
        state.url = Some(connection_url);
        state.alive = alive;
        metrics::connection_opened(PROVIDER);

        tracing::info!(url = %url, "Connected to RabbitMQ server");
        Ok(())
    }

    async fn publish(&self, subject: &str, data: &[u8]) -> MessagingResult<()> {
        let state = self.state.read().await;
        let channel = state
            .channel
            .as_ref()
            .ok_or(MessagingError::NotConnected(ProviderType::RabbitMq))?;

        if let Err(e) = channel
            .queue_declare(subject, durable_queue(), FieldTable::default())
            .await
        {
            tracing::warn!(queue = %subject, error = %e, "Failed to declare queue before publish");
        }

        let properties = BasicProperties::default()
            .with_content_type("text/plain".into())
            .with_delivery_mode(PERSISTENT)
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        // The publisher confirm is not awaited: publish returns once the
        // frame is handed to the connection.
        let result = channel
            .basic_publish("", subject, BasicPublishOptions::default(), data, properties)
            .await
            .map(|_confirm| ())
            .map_err(|e| MessagingError::PublishFailed(format!("failed to publish message: {}", e)));
        metrics::record_publish(PROVIDER, &result);
        result?;

        tracing::debug!(queue = %subject, bytes = data.len(), "Published RabbitMQ message");
        Ok(())
    }

    async fn subscribe(&self, subject_pattern: &str, handler: MessageHandler) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        let channel = state
            .channel
            .clone()
            .ok_or(MessagingError::NotConnected(ProviderType::RabbitMq))?;

        if state.subscriptions.contains_key(subject_pattern) {
            return Err(MessagingError::AlreadySubscribed(subject_pattern.to_string()));
        }

        let queue = channel
            .queue_declare(subject_pattern, durable_queue(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::SubscribeFailed(format!("failed to declare queue: {}", e)))?;
        let queue_name = queue.name().as_str().to_string();

        let consumer_tag = self.consumer_tag();
        let mut consumer = channel
            .basic_consume(
                &queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MessagingError::SubscribeFailed(format!("failed to register consumer: {}", e))
            })?;

        let alive = state.alive.clone();
        let queue_for_task = queue_name.clone();
        let task = DeliveryTask::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(queue = %queue_for_task, "Stopping RabbitMQ delivery loop");
                        break;
                    }
                    delivery = consumer.next() => match delivery {
                        Some(Ok(delivery)) => {
                            metrics::record_received(PROVIDER);
                            handler(delivery.routing_key.as_str(), delivery.data.as_slice());
                        }
                        Some(Err(e)) => {
                            tracing::error!(queue = %queue_for_task, error = %e, "RabbitMQ delivery failed");
                            alive.store(false, Ordering::SeqCst);
                            break;
                        }
                        None => {
                            tracing::info!(queue = %queue_for_task, "Delivery channel closed");
                            break;
                        }
                    }
                }
            }
        });

        state.subscriptions.insert(
            subject_pattern.to_string(),
            AmqpSubscription {
                queue: queue_name,
                consumer_tag,
                task,
            },
        );

        tracing::info!(queue = %subject_pattern, "Subscribed to RabbitMQ queue");
        Ok(())
    }

    async fn unsubscribe(&self, subject_pattern: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        let channel = state
            .channel
            .clone()
            .ok_or(MessagingError::NotConnected(ProviderType::RabbitMq))?;

        let subscription = state
            .subscriptions
            .remove(subject_pattern)
            .ok_or_else(|| MessagingError::NotSubscribed(subject_pattern.to_string()))?;

        if let Err(e) = channel
            .basic_cancel(&subscription.consumer_tag, BasicCancelOptions::default())
            .await
        {
            tracing::warn!(queue = %subscription.queue, error = %e, "Failed to cancel consumer");
        }
        subscription.task.stop();

        tracing::info!(queue = %subject_pattern, "Unsubscribed from RabbitMQ queue");
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        let Some(connection) = state.connection.take() else {
            return Ok(());
        };
        let channel = state.channel.take();

        for (pattern, subscription) in state.subscriptions.drain() {
            subscription.task.stop();
            if let Some(channel) = channel.as_ref() {
                let cancel = channel.basic_cancel(&subscription.consumer_tag, BasicCancelOptions::default());
                if let Ok(Err(e)) = tokio::time::timeout(self.close_timeout, cancel).await {
                    tracing::debug!(queue = %pattern, error = %e, "Failed to cancel consumer on close");
                }
            }
            tracing::debug!(queue = %pattern, "Stopped subscription");
        }

        if let Some(channel) = channel {
            match tokio::time::timeout(self.close_timeout, channel.close(200, "closing")).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to close RabbitMQ channel"),
                Err(_) => tracing::warn!("Timed out closing RabbitMQ channel"),
            }
        }

        match tokio::time::timeout(self.close_timeout, connection.close(200, "closing")).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to close RabbitMQ connection"),
            Err(_) => tracing::warn!("Timed out closing RabbitMQ connection"),
        }

        state.url = None;
        state.alive.store(false, Ordering::SeqCst);
        metrics::connection_closed(PROVIDER);

        tracing::info!("Disconnected from RabbitMQ server");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let state = self.state.read().await;
        match (state.connection.as_ref(), state.channel.as_ref()) {
            (Some(connection), Some(channel)) => {
                state.alive.load(Ordering::SeqCst)
                    && connection.status().connected()
                    && channel.status().connected()
            }
            _ => false,
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::RabbitMq
    }
}
