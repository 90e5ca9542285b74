use crate::services::MessageService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Per-subscription counters at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub counts: HashMap<String, u64>,
    pub taken_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    fn capture(service: &MessageService) -> Self {
        Self {
            counts: service.dashboard_counts(),
            taken_at: Utc::now(),
        }
    }

    /// Sum over every subscription
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Periodically publishes [`DashboardSnapshot`]s of a [`MessageService`]
pub struct DashboardMonitor {
    receiver: watch::Receiver<DashboardSnapshot>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DashboardMonitor {
    /// Start refreshing every `interval`
    pub fn start(service: MessageService, interval: Duration) -> Self {
        let (sender, receiver) = watch::channel(DashboardSnapshot::capture(&service));
        let cancel_token = CancellationToken::new();

        let cancel = cancel_token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = DashboardSnapshot::capture(&service);
                        // only wake watchers when something moved
                        sender.send_if_modified(|current| {
                            if current.counts == snapshot.counts {
                                false
                            } else {
                                *current = snapshot;
                                true
                            }
                        });
                    }
                }
            }
            tracing::debug!("Dashboard refresh loop stopped");
        });

        Self {
            receiver,
            cancel_token,
            handle: Some(handle),
        }
    }

    /// A receiver that observes every changed snapshot
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.receiver.clone()
    }

    /// Latest snapshot
    pub fn latest(&self) -> DashboardSnapshot {
        self.receiver.borrow().clone()
    }

    /// Stop the refresh loop and wait for it to exit
    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dashboard refresh task failed");
            }
        }
    }
}

impl Drop for DashboardMonitor {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryBroker, InMemoryProvider, MessagingProvider, ProviderType};
    use crate::state::create_in_memory_repository;

    #[tokio::test]
    async fn test_monitor_observes_new_counts() {
        let service = MessageService::new(create_in_memory_repository());
        let provider = InMemoryProvider::new(InMemoryBroker::new(), ProviderType::Nats);
        provider.connect("memory://").await.unwrap();
        service.subscribe(&provider, "watch", "orders", None).await.unwrap();

        let monitor = DashboardMonitor::start(service.clone(), Duration::from_millis(10));
        let mut updates = monitor.subscribe();
        assert_eq!(monitor.latest().total(), 0);

        provider.publish("orders", b"x").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                updates.changed().await.unwrap();
                if updates.borrow().counts.get("watch") == Some(&1) {
                    break;
                }
            }
        })
        .await
        .unwrap();

        monitor.stop().await;
    }
}
