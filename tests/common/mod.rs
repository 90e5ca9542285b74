//! Shared helpers for integration tests

#![allow(dead_code)]

use broker_ui::messaging::{
    InMemoryBroker, InMemoryProvider, MessageHandler, MessagingProvider, ProviderFactory,
    ProviderType,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Handler that records every delivery
pub fn recording_handler() -> (MessageHandler, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = deliveries.clone();
    let handler: MessageHandler = Arc::new(move |subject: &str, data: &[u8]| {
        sink.lock().push((subject.to_string(), data.to_vec()));
    });
    (handler, deliveries)
}

/// Wait until `deliveries` holds at least `count` entries
pub async fn wait_for_deliveries(deliveries: &Arc<Mutex<Vec<(String, Vec<u8>)>>>, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while deliveries.lock().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for deliveries");
}

/// Factory whose NATS and Kafka slots build in-memory providers on one broker
pub fn memory_factory(broker: &InMemoryBroker) -> ProviderFactory {
    let mut factory = ProviderFactory::empty();
    for provider_type in [ProviderType::Nats, ProviderType::Kafka] {
        let broker = broker.clone();
        factory.register(provider_type, move || {
            Arc::new(InMemoryProvider::new(broker.clone(), provider_type)) as Arc<dyn MessagingProvider>
        });
    }
    factory
}
