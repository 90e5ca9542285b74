use crate::error::Result;
use crate::messaging::{MessageHandler, MessagingError, MessagingProvider};
use crate::models::{NewSubscription, NewTopic, Subscription, Topic};
use crate::state::{Repository, SubscriptionRepository, TopicRepository};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct History {
    /// topic → payloads in publish order
    sent: HashMap<String, Vec<String>>,
    /// subscription name → `[subject] payload` lines in delivery order
    received: HashMap<String, Vec<String>>,
    /// subscription name → messages delivered this session
    counts: HashMap<String, u64>,
}

/// Publish/subscribe orchestration with per-session history and counters.
///
/// History lives behind one synchronous lock that delivery handlers take only
/// for the append; readers always get copies.
#[derive(Clone)]
pub struct MessageService {
    repository: Arc<dyn Repository>,
    history: Arc<RwLock<History>>,
}

impl MessageService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            history: Arc::new(RwLock::new(History::default())),
        }
    }

    pub async fn save_topic(&self, server_id: u64, name: &str) -> Result<Topic> {
        self.repository.save_topic(NewTopic::new(server_id, name)).await
    }

    pub async fn delete_topic(&self, name: &str, server_id: u64) -> Result<()> {
        self.repository.delete_topic(name, server_id).await
    }

    pub async fn save_subscription(
        &self,
        server_id: u64,
        name: &str,
        subject_pattern: &str,
    ) -> Result<Subscription> {
        self.repository
            .save_subscription(NewSubscription::new(server_id, name, subject_pattern))
            .await
    }

    /// Delete the record and forget its received history and counter.
    ///
    /// With `provider`, the live handler for the subscription's pattern is
    /// removed first so no later delivery recreates the history.
    pub async fn delete_subscription(
        &self,
        name: &str,
        server_id: u64,
        provider: Option<&dyn MessagingProvider>,
    ) -> Result<()> {
        if let Some(provider) = provider {
            let pattern = self
                .repository
                .get_subscriptions_by_server(server_id)
                .await?
                .into_iter()
                .find(|subscription| subscription.name == name)
                .map(|subscription| subscription.subject_pattern);

            if let Some(pattern) = pattern {
                match provider.unsubscribe(&pattern).await {
                    Ok(()) | Err(MessagingError::NotSubscribed(_)) | Err(MessagingError::NotConnected(_)) => {}
                    Err(e) => warn!(subscription = %name, pattern = %pattern, error = %e, "Failed to unsubscribe"),
                }
            }
        }

        self.repository.delete_subscription(name, server_id).await?;

        let mut history = self.history.write();
        history.received.remove(name);
        history.counts.remove(name);
        Ok(())
    }

    /// Publish `payload` on `subject` and record it; an empty payload is a no-op
    pub async fn publish_message(
        &self,
        provider: &dyn MessagingProvider,
        subject: &str,
        payload: &str,
    ) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        provider.publish(subject, payload.as_bytes()).await?;
        info!(subject = %subject, provider = %provider.provider_type(), "Sent message");

        self.history
            .write()
            .sent
            .entry(subject.to_string())
            .or_default()
            .push(payload.to_string());
        Ok(())
    }

    /// Subscribe `name` to `subject_pattern` on `provider`.
    ///
    /// Clears the received history for `name` once the provider accepts the
    /// handler; a rejected subscribe leaves the existing history alone. Every
    /// delivery is recorded as `[subject] payload`, counted, and offered to
    /// `channel` with `try_send`; a full or closed channel only loses the
    /// forwarded copy.
    pub async fn subscribe(
        &self,
        provider: &dyn MessagingProvider,
        name: &str,
        subject_pattern: &str,
        channel: Option<mpsc::Sender<String>>,
    ) -> Result<()> {
        let history = self.history.clone();
        let subscription = name.to_string();
        let handler: MessageHandler = Arc::new(move |subject: &str, data: &[u8]| {
            let message = format!("[{}] {}", subject, String::from_utf8_lossy(data));
            debug!(subscription = %subscription, subject = %subject, "Received message");

            {
                let mut history = history.write();
                history
                    .received
                    .entry(subscription.clone())
                    .or_default()
                    .push(message.clone());
                *history.counts.entry(subscription.clone()).or_insert(0) += 1;
            }

            if let Some(channel) = channel.as_ref() {
                if channel.try_send(message).is_err() {
                    debug!(subscription = %subscription, "Delivery channel full or closed; dropped forwarded copy");
                }
            }
        });

        provider.subscribe(subject_pattern, handler).await?;
        self.history.write().received.insert(name.to_string(), Vec::new());
        info!(subscription = %name, pattern = %subject_pattern, "Subscribed");
        Ok(())
    }

    /// Payloads sent to `topic`, oldest first
    pub fn sent_messages(&self, topic: &str) -> Vec<String> {
        self.history.read().sent.get(topic).cloned().unwrap_or_default()
    }

    /// Formatted deliveries for subscription `name`, oldest first
    pub fn received_messages(&self, name: &str) -> Vec<String> {
        self.history.read().received.get(name).cloned().unwrap_or_default()
    }

    /// Snapshot of the per-subscription counters
    pub fn dashboard_counts(&self) -> HashMap<String, u64> {
        self.history.read().counts.clone()
    }
}
