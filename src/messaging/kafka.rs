//! Kafka provider implementation

use crate::messaging::config::KafkaConfig;
use crate::messaging::delivery::DeliveryTask;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics;
use crate::messaging::traits::{MessageHandler, MessagingProvider, ProviderType};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

const PROVIDER: &str = "Kafka";

struct PartitionConsumer {
    partition: i32,
    consumer: Arc<StreamConsumer>,
    task: DeliveryTask,
}

#[derive(Default)]
struct KafkaState {
    brokers: Option<String>,
    producer: Option<FutureProducer>,
    /// Used only for metadata lookups
    metadata: Option<Arc<BaseConsumer>>,
    subscriptions: HashMap<String, Vec<PartitionConsumer>>,
}

/// Kafka provider wrapping a producer and per-partition consumers.
///
/// Subscriptions read every partition of a topic from the newest offset.
/// There is no consumer-group coordination and nothing is committed, so each
/// subscribe starts at "now".
pub struct KafkaProvider {
    config: KafkaConfig,
    close_timeout: Duration,
    state: RwLock<KafkaState>,
}

impl KafkaProvider {
    /// Create a new, unconnected Kafka provider
    pub fn new(config: KafkaConfig, close_timeout: Duration) -> Self {
        Self {
            config,
            close_timeout,
            state: RwLock::new(KafkaState::default()),
        }
    }

    fn client_config(&self, brokers: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", brokers)
            .set("client.id", &self.config.client_id);
        client_config
    }

    fn consumer_config(&self, brokers: &str) -> ClientConfig {
        let mut client_config = self.client_config(brokers);
        client_config
            .set("group.id", format!("{}-{}", self.config.client_id, Uuid::new_v4()))
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        client_config
    }

    fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.config.metadata_timeout_ms)
    }

    /// Partition ids of `topic`, fetched off the async runtime
    async fn partitions(consumer: Arc<BaseConsumer>, topic: &str, timeout: Duration) -> MessagingResult<Vec<i32>> {
        let lookup = topic.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<i32>, String> {
            let metadata = consumer
                .fetch_metadata(Some(lookup.as_str()), timeout)
                .map_err(|e| format!("failed to get partitions for topic {}: {}", lookup, e))?;

            let topic_metadata = metadata
                .topics()
                .iter()
                .find(|t| t.name() == lookup)
                .ok_or_else(|| format!("topic {} not found", lookup))?;

            if let Some(err) = topic_metadata.error() {
                return Err(format!("topic {} unavailable: {:?}", lookup, err));
            }

            Ok(topic_metadata.partitions().iter().map(|p| p.id()).collect())
        })
        .await
        .map_err(|e| MessagingError::SubscribeFailed(format!("metadata lookup aborted: {}", e)))?
        .map_err(MessagingError::SubscribeFailed)
    }

    fn start_partition(
        &self,
        brokers: &str,
        topic: &str,
        partition: i32,
        handler: MessageHandler,
    ) -> MessagingResult<PartitionConsumer> {
        let consumer: StreamConsumer = self.consumer_config(brokers).create().map_err(|e| {
            MessagingError::SubscribeFailed(format!("Kafka consumer creation failed: {}", e))
        })?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, Offset::End)
            .and_then(|_| consumer.assign(&assignment))
            .map_err(|e| {
                MessagingError::SubscribeFailed(format!(
                    "error subscribing to topic {}, partition {}: {}",
                    topic, partition, e
                ))
            })?;

        let consumer = Arc::new(consumer);
        let loop_consumer = consumer.clone();
        let topic_name = topic.to_string();
        let task = DeliveryTask::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    message = loop_consumer.recv() => match message {
                        Ok(message) => {
                            metrics::record_received(PROVIDER);
                            handler(message.topic(), message.payload().unwrap_or_default());
                        }
                        Err(e) => {
                            tracing::warn!(topic = %topic_name, partition, error = %e, "Kafka receive failed");
                        }
                    }
                }
            }
            tracing::debug!(topic = %topic_name, partition, "Kafka partition loop stopped");
        });

        Ok(PartitionConsumer {
            partition,
            consumer,
            task,
        })
    }
}

/// Strip an optional `kafka://` scheme from a broker list
pub fn bootstrap_servers(url: &str) -> &str {
    url.strip_prefix("kafka://").unwrap_or(url)
}

fn stop_partitions(topic: &str, partitions: Vec<PartitionConsumer>, failures: &mut Vec<String>) {
    for partition in partitions {
        partition.task.stop();
        if let Err(e) = partition.consumer.unassign() {
            failures.push(format!(
                "failed to close consumer for {}[{}]: {}",
                topic, partition.partition, e
            ));
        }
    }
}

#[async_trait]
impl MessagingProvider for KafkaProvider {
    async fn connect(&self, url: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.producer.is_some() {
            tracing::debug!(url = %url, "Kafka provider already connected");
            return Ok(());
        }

        let brokers = bootstrap_servers(url).to_string();

        let producer: FutureProducer = self
            .client_config(&brokers)
            .set("message.timeout.ms", self.config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| {
                MessagingError::ConnectionFailed(format!("failed to create Kafka producer: {}", e))
            })?;

        let metadata: BaseConsumer = self.consumer_config(&brokers).create().map_err(|e| {
            MessagingError::ConnectionFailed(format!("failed to create Kafka consumer: {}", e))
        })?;
        let metadata = Arc::new(metadata);

        // Client creation is lazy; a metadata round trip proves the brokers answer.
        let probe = metadata.clone();
        let timeout = self.metadata_timeout();
        tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| MessagingError::ConnectionFailed(format!("Kafka handshake aborted: {}", e)))?
            .map_err(|e| {
                MessagingError::ConnectionFailed(format!(
                    "failed to reach Kafka brokers at {}: {}",
                    brokers, e
                ))
            })?;

        state.producer = Some(producer);
        state.metadata = Some(metadata);
        state.brokers = Some(brokers);
        metrics::connection_opened(PROVIDER);

        tracing::info!(url = %url, "Connected to Kafka brokers");
        Ok(())
    }

    async fn publish(&self, subject: &str, data: &[u8]) -> MessagingResult<()> {
        let state = self.state.read().await;
        let producer = state
            .producer
            .as_ref()
            .ok_or(MessagingError::NotConnected(ProviderType::Kafka))?;

        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(subject).payload(data);
        let timeout = Timeout::After(Duration::from_millis(self.config.message_timeout_ms));

        let result = producer.send(record, timeout).await.map_err(|(e, _)| {
            MessagingError::PublishFailed(format!(
                "failed to publish message to topic {}: {}",
                subject, e
            ))
        });
        metrics::record_publish(PROVIDER, &result);
        let (partition, offset) = result?;

        tracing::debug!(topic = %subject, partition, offset, "Published Kafka message");
        Ok(())
    }

    async fn subscribe(&self, subject_pattern: &str, handler: MessageHandler) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        let (metadata, brokers) = match (state.metadata.clone(), state.brokers.clone()) {
            (Some(metadata), Some(brokers)) => (metadata, brokers),
            _ => return Err(MessagingError::NotConnected(ProviderType::Kafka)),
        };

        if state.subscriptions.contains_key(subject_pattern) {
            return Err(MessagingError::AlreadySubscribed(subject_pattern.to_string()));
        }

        let partitions = Self::partitions(metadata, subject_pattern, self.metadata_timeout()).await?;
        if partitions.is_empty() {
            return Err(MessagingError::SubscribeFailed(format!(
                "topic {} has no partitions",
                subject_pattern
            )));
        }

        // Consumers started so far are dropped (and their loops cancelled) on error.
        let consumers = partitions
            .into_iter()
            .map(|partition| self.start_partition(&brokers, subject_pattern, partition, handler.clone()))
            .collect::<MessagingResult<Vec<_>>>()?;

        tracing::info!(
            topic = %subject_pattern,
            partitions = consumers.len(),
            "Subscribed to Kafka topic"
        );
        state.subscriptions.insert(subject_pattern.to_string(), consumers);
        Ok(())
    }

    async fn unsubscribe(&self, subject_pattern: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.producer.is_none() {
            return Err(MessagingError::NotConnected(ProviderType::Kafka));
        }

        let partitions = state
            .subscriptions
            .remove(subject_pattern)
            .ok_or_else(|| MessagingError::NotSubscribed(subject_pattern.to_string()))?;

        let mut failures = Vec::new();
        stop_partitions(subject_pattern, partitions, &mut failures);
        for failure in failures {
            tracing::warn!(topic = %subject_pattern, error = %failure, "Kafka unsubscribe cleanup failed");
        }

        tracing::info!(topic = %subject_pattern, "Unsubscribed from Kafka topic");
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        let Some(producer) = state.producer.take() else {
            return Ok(());
        };
        state.metadata = None;
        state.brokers = None;

        let mut failures = Vec::new();

        for (topic, partitions) in state.subscriptions.drain() {
            stop_partitions(&topic, partitions, &mut failures);
        }

        let flush_timeout = Duration::from_millis(self.config.flush_timeout_ms);
        let flush = tokio::task::spawn_blocking(move || producer.flush(Timeout::After(flush_timeout)));
        match tokio::time::timeout(self.close_timeout, flush).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => failures.push(format!("failed to close Kafka producer: {}", e)),
            Ok(Err(e)) => failures.push(format!("failed to close Kafka producer: {}", e)),
            Err(_) => failures.push("timed out closing Kafka producer".to_string()),
        }

        metrics::connection_closed(PROVIDER);

        if failures.is_empty() {
            tracing::info!("Disconnected from Kafka brokers");
            Ok(())
        } else {
            for failure in &failures {
                tracing::error!(error = %failure, "Error closing Kafka connection");
            }
            Err(MessagingError::CloseFailed {
                provider: ProviderType::Kafka,
                failures,
            })
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.producer.is_some()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Kafka
    }
}
