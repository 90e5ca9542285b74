mod common;

use broker_ui::{
    messaging::{InMemoryBroker, MessagingError, MessagingProvider, ProviderFactory, ProviderType},
    models::NewServer,
    services::{MessageService, ServerService},
    state::create_in_memory_repository,
    AppError,
};
use common::memory_factory;
use std::time::Duration;
use tokio::sync::mpsc;

async fn wait_for_count(service: &MessageService, name: &str, expected: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.dashboard_counts().get(name).copied().unwrap_or(0) < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for deliveries");
}

/// Publish through one server, receive through another on the same broker
#[tokio::test]
async fn test_end_to_end_message_flow() {
    let broker = InMemoryBroker::new();
    let repository = create_in_memory_repository();
    let servers = ServerService::new(repository.clone(), memory_factory(&broker));
    let messages = MessageService::new(repository);

    let sender = servers
        .save_server(NewServer::new("sender", "localhost:4222", ProviderType::Nats))
        .await
        .unwrap();
    let receiver = servers
        .save_server(NewServer::new("receiver", "localhost:9092", ProviderType::Kafka))
        .await
        .unwrap();
    messages.save_topic(sender.id, "orders.new").await.unwrap();
    messages
        .save_subscription(receiver.id, "new-orders", "orders.*")
        .await
        .unwrap();

    let publisher = servers.connect_to_server(&sender).await.unwrap();
    let subscriber = servers.connect_by_id(receiver.id).await.unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    messages
        .subscribe(subscriber.as_ref(), "new-orders", "orders.*", Some(tx))
        .await
        .unwrap();

    for payload in ["a", "b", "c"] {
        messages
            .publish_message(publisher.as_ref(), "orders.new", payload)
            .await
            .unwrap();
    }

    wait_for_count(&messages, "new-orders", 3).await;
    assert_eq!(messages.sent_messages("orders.new"), vec!["a", "b", "c"]);
    assert_eq!(
        messages.received_messages("new-orders"),
        vec!["[orders.new] a", "[orders.new] b", "[orders.new] c"]
    );
    assert_eq!(messages.dashboard_counts().get("new-orders"), Some(&3));
    assert_eq!(rx.recv().await.unwrap(), "[orders.new] a");

    servers.disconnect_all().await.unwrap();
    assert!(!publisher.is_connected().await);
    assert!(servers.connected_server_ids().await.is_empty());
}

/// An empty payload never reaches the provider
#[tokio::test]
async fn test_empty_payload_is_not_published() {
    let broker = InMemoryBroker::new();
    let repository = create_in_memory_repository();
    let servers = ServerService::new(repository.clone(), memory_factory(&broker));
    let messages = MessageService::new(repository);

    let server = servers
        .save_server(NewServer::new("local", "localhost:4222", ProviderType::Nats))
        .await
        .unwrap();
    let provider = servers.connect_to_server(&server).await.unwrap();

    messages
        .subscribe(provider.as_ref(), "everything", ">", None)
        .await
        .unwrap();
    messages
        .publish_message(provider.as_ref(), "orders", "")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(messages.sent_messages("orders").is_empty());
    assert!(messages.received_messages("everything").is_empty());
}

/// A failed connection attempt leaves nothing in the registry
#[tokio::test]
async fn test_failed_connect_leaves_no_entry() {
    let servers = ServerService::new(create_in_memory_repository(), ProviderFactory::default());
    let server = servers
        .save_server(NewServer::new("down", "nats://127.0.0.1:1", ProviderType::Nats))
        .await
        .unwrap();

    let err = servers.connect_to_server(&server).await.err().unwrap();
    assert!(matches!(
        err,
        AppError::Messaging(MessagingError::ConnectionFailed(_))
    ));
    assert!(servers.get_messaging_provider(server.id).await.is_none());
    assert!(!servers.is_connected(server.id).await);
}

/// Unknown server ids are reported as not found
#[tokio::test]
async fn test_connect_unknown_server() {
    let servers = ServerService::new(create_in_memory_repository(), ProviderFactory::default());
    let err = servers.connect_by_id(404).await.err().unwrap();
    assert!(err.is_not_found());
}

/// The registry only offers providers the factory can build
#[test]
fn test_supported_providers_follow_factory() {
    let broker = InMemoryBroker::new();
    let servers = ServerService::new(create_in_memory_repository(), memory_factory(&broker));
    assert_eq!(
        servers.supported_providers(),
        vec![ProviderType::Nats, ProviderType::Kafka]
    );
}
