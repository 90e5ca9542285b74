//! In-process provider
//!
//! Routes messages between subscriptions of the same [`InMemoryBroker`]
//! without any network. Subject patterns follow NATS conventions: tokens are
//! separated by `.`, `*` matches exactly one token and a trailing `>` matches
//! one or more tokens.

use crate::messaging::delivery::DeliveryTask;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics;
use crate::messaging::traits::{MessageHandler, MessagingProvider, ProviderType};
use async_trait::async_trait;
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

type Delivery = (String, Vec<u8>);

/// True if `subject` matches the NATS-style `pattern`
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Route {
    pattern: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// Shared routing table; clones refer to the same broker
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    routes: Arc<SyncRwLock<HashMap<u64, Route>>>,
    next_route: Arc<AtomicU64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver to every matching route, returning how many received it
    pub fn publish(&self, subject: &str, data: &[u8]) -> usize {
        let routes = self.routes.read();
        routes
            .values()
            .filter(|route| subject_matches(&route.pattern, subject))
            .filter(|route| route.sender.send((subject.to_string(), data.to_vec())).is_ok())
            .count()
    }

    fn register(&self, pattern: &str) -> (u64, mpsc::UnboundedReceiver<Delivery>) {
        let id = self.next_route.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.write().insert(
            id,
            Route {
                pattern: pattern.to_string(),
                sender,
            },
        );
        (id, receiver)
    }

    fn deregister(&self, id: u64) {
        self.routes.write().remove(&id);
    }

    /// Number of live routes
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }
}

struct MemorySubscription {
    route: u64,
    task: DeliveryTask,
}

#[derive(Default)]
struct MemoryState {
    url: Option<String>,
    subscriptions: HashMap<String, MemorySubscription>,
}

/// Provider backed by an [`InMemoryBroker`].
///
/// Reports whichever [`ProviderType`] it was created with, so it can stand in
/// for any broker in a server registry.
pub struct InMemoryProvider {
    broker: InMemoryBroker,
    provider_type: ProviderType,
    connections_opened: AtomicUsize,
    state: RwLock<MemoryState>,
}

impl InMemoryProvider {
    pub fn new(broker: InMemoryBroker, provider_type: ProviderType) -> Self {
        Self {
            broker,
            provider_type,
            connections_opened: AtomicUsize::new(0),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// How many times an underlying connection was actually opened
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// Patterns currently registered
    pub async fn subscribed_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.state.read().await.subscriptions.keys().cloned().collect();
        patterns.sort();
        patterns
    }

    fn label(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl MessagingProvider for InMemoryProvider {
    async fn connect(&self, url: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        if state.url.is_some() {
            return Ok(());
        }

        state.url = Some(url.to_string());
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        metrics::connection_opened(self.label());

        tracing::debug!(url = %url, provider = %self.provider_type, "Connected in-memory provider");
        Ok(())
    }

    async fn publish(&self, subject: &str, data: &[u8]) -> MessagingResult<()> {
        let state = self.state.read().await;
        if state.url.is_none() {
            return Err(MessagingError::NotConnected(self.provider_type));
        }

        let delivered = self.broker.publish(subject, data);
        metrics::record_publish::<(), ()>(self.label(), &Ok(()));

        tracing::trace!(subject = %subject, delivered, "Published in-memory message");
        Ok(())
    }

    async fn subscribe(&self, subject_pattern: &str, handler: MessageHandler) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        if state.url.is_none() {
            return Err(MessagingError::NotConnected(self.provider_type));
        }
        if state.subscriptions.contains_key(subject_pattern) {
            return Err(MessagingError::AlreadySubscribed(subject_pattern.to_string()));
        }

        let (route, mut receiver) = self.broker.register(subject_pattern);
        let label = self.label();
        let task = DeliveryTask::spawn(move |cancel| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    delivery = receiver.recv() => match delivery {
                        Some((subject, data)) => {
                            metrics::record_received(label);
                            handler(subject.as_str(), data.as_slice());
                        }
                        None => break,
                    }
                }
            }
        });

        state
            .subscriptions
            .insert(subject_pattern.to_string(), MemorySubscription { route, task });
        Ok(())
    }

    async fn unsubscribe(&self, subject_pattern: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        if state.url.is_none() {
            return Err(MessagingError::NotConnected(self.provider_type));
        }

        let subscription = state
            .subscriptions
            .remove(subject_pattern)
            .ok_or_else(|| MessagingError::NotSubscribed(subject_pattern.to_string()))?;
        self.broker.deregister(subscription.route);
        subscription.task.stop();
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        if state.url.take().is_none() {
            return Ok(());
        }

        for (_, subscription) in state.subscriptions.drain() {
            self.broker.deregister(subscription.route);
            subscription.task.stop();
        }
        metrics::connection_closed(self.label());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.url.is_some()
    }

    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("orders.new", "orders.new"));
        assert!(!subject_matches("orders.new", "orders.old"));
        assert!(subject_matches("orders.*", "orders.new"));
        assert!(!subject_matches("orders.*", "orders.new.eu"));
        assert!(subject_matches("orders.>", "orders.new.eu"));
        assert!(!subject_matches("orders.>", "orders"));
        assert!(subject_matches("*.new", "orders.new"));
        assert!(!subject_matches("orders", "orders.new"));
    }

    #[tokio::test]
    async fn test_broker_routes_by_pattern() {
        let broker = InMemoryBroker::new();
        let (_, mut wildcard) = broker.register("orders.*");
        let (exact_id, _exact) = broker.register("orders.new");
        assert_eq!(broker.route_count(), 2);

        assert_eq!(broker.publish("orders.new", b"a"), 2);
        assert_eq!(broker.publish("orders.old", b"b"), 1);

        broker.deregister(exact_id);
        assert_eq!(broker.route_count(), 1);

        assert_eq!(wildcard.recv().await.unwrap(), ("orders.new".to_string(), b"a".to_vec()));
        assert_eq!(wildcard.recv().await.unwrap(), ("orders.old".to_string(), b"b".to_vec()));
    }
}
