mod common;

use async_trait::async_trait;
use broker_ui::messaging::{
    AccessTokenSource, MessagingError, MessagingProvider, MessagingResult, PubSubConfig,
    PubSubProvider,
};
use common::{recording_handler, wait_for_deliveries};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;

struct StaticToken(&'static str);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> MessagingResult<String> {
        Ok(self.0.to_string())
    }
}

fn provider() -> PubSubProvider {
    PubSubProvider::new(PubSubConfig {
        request_timeout_ms: 2000,
        ..Default::default()
    })
}

async fn mock_probe(server: &mut mockito::Server, status: usize) -> mockito::Mock {
    server
        .mock("GET", "/v1/projects/demo/topics")
        .match_query(Matcher::UrlEncoded("pageSize".into(), "1".into()))
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(r#"{"topics":[]}"#)
        .create_async()
        .await
}

/// Connect probes the project named in the URL path
#[tokio::test]
async fn test_connect_probes_project() {
    let mut server = mockito::Server::new_async().await;
    let probe = mock_probe(&mut server, 200).await;

    let pubsub = provider();
    pubsub.connect(&format!("{}/demo", server.url())).await.unwrap();

    assert!(pubsub.is_connected().await);
    assert_eq!(pubsub.project_id().await.as_deref(), Some("demo"));
    probe.assert_async().await;

    // a second connect reuses the connection
    pubsub.connect(&format!("{}/demo", server.url())).await.unwrap();
    pubsub.close().await.unwrap();
    assert!(!pubsub.is_connected().await);
}

/// A rejected probe surfaces as ConnectionFailed
#[tokio::test]
async fn test_connect_failure() {
    let mut server = mockito::Server::new_async().await;
    let _probe = mock_probe(&mut server, 403).await;

    let pubsub = provider();
    let err = pubsub
        .connect(&format!("{}/demo", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::ConnectionFailed(_)));
    assert!(!pubsub.is_connected().await);
}

/// Publish creates a missing topic once and sends base64 data
#[tokio::test]
async fn test_publish_creates_topic() {
    let mut server = mockito::Server::new_async().await;
    let _probe = mock_probe(&mut server, 200).await;
    let lookup = server
        .mock("GET", "/v1/projects/demo/topics/orders")
        .match_query(Matcher::Any)
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let create = server
        .mock("PUT", "/v1/projects/demo/topics/orders")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let publish = server
        .mock("POST", "/v1/projects/demo/topics/orders:publish")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "messages": [{ "data": "aGVsbG8=" }]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"messageIds":["42"]}"#)
        .expect(2)
        .create_async()
        .await;

    let pubsub = provider();
    pubsub.connect(&format!("{}/demo", server.url())).await.unwrap();
    pubsub.publish("orders", b"hello").await.unwrap();
    pubsub.publish("orders", b"hello").await.unwrap();

    lookup.assert_async().await;
    create.assert_async().await;
    publish.assert_async().await;
}

/// Subscribe derives `<topic>-subscription`, pulls, and acks each message
#[tokio::test]
async fn test_subscribe_pulls_and_acknowledges() {
    let mut server = mockito::Server::new_async().await;
    let _probe = mock_probe(&mut server, 200).await;
    let _topic = server
        .mock("GET", "/v1/projects/demo/topics/orders")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"name":"projects/demo/topics/orders"}"#)
        .create_async()
        .await;
    let _lookup = server
        .mock("GET", "/v1/projects/demo/subscriptions/orders-subscription")
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let create = server
        .mock("PUT", "/v1/projects/demo/subscriptions/orders-subscription")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "topic": "projects/demo/topics/orders"
        })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let _pull = server
        .mock("POST", "/v1/projects/demo/subscriptions/orders-subscription:pull")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"receivedMessages":[{"ackId":"a1","message":{"data":"aGk=","messageId":"m1"}}]}"#,
        )
        .create_async()
        .await;
    let ack = server
        .mock("POST", "/v1/projects/demo/subscriptions/orders-subscription:acknowledge")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({ "ackIds": ["a1"] })))
        .with_status(200)
        .with_body("{}")
        .expect_at_least(1)
        .create_async()
        .await;

    let pubsub = provider();
    pubsub.connect(&format!("{}/demo", server.url())).await.unwrap();

    let (handler, deliveries) = recording_handler();
    pubsub.subscribe("orders", handler).await.unwrap();
    // a second delivery implies the first was acknowledged
    wait_for_deliveries(&deliveries, 2).await;

    assert_eq!(deliveries.lock()[0], ("orders".to_string(), b"hi".to_vec()));

    pubsub.unsubscribe("orders").await.unwrap();
    assert!(matches!(
        pubsub.unsubscribe("orders").await,
        Err(MessagingError::NotSubscribed(_))
    ));
    pubsub.close().await.unwrap();

    create.assert_async().await;
    ack.assert_async().await;
}

/// Plain-HTTP endpoints are called without credentials
#[tokio::test]
async fn test_plain_http_endpoint_sends_no_token() {
    let mut server = mockito::Server::new_async().await;
    let probe = server
        .mock("GET", "/v1/projects/demo/topics")
        .match_query(Matcher::Any)
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(r#"{"topics":[]}"#)
        .create_async()
        .await;

    let pubsub = PubSubProvider::with_credentials(PubSubConfig::default(), Arc::new(StaticToken("unused")));
    pubsub.connect(&format!("{}/demo", server.url())).await.unwrap();
    probe.assert_async().await;
}

/// Project ids resolve to the configured Google endpoint and carry a bearer token
#[tokio::test]
async fn test_google_endpoint_sends_bearer_token() {
    let mut server = mockito::Server::new_async().await;
    let probe = server
        .mock("GET", "/v1/projects/billing/topics")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_body(r#"{"topics":[]}"#)
        .create_async()
        .await;
    let lookup = server
        .mock("GET", "/v1/projects/billing/topics/orders")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_body(r#"{"name":"projects/billing/topics/orders"}"#)
        .create_async()
        .await;
    let publish = server
        .mock("POST", "/v1/projects/billing/topics/orders:publish")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"messageIds":["7"]}"#)
        .create_async()
        .await;

    let config = PubSubConfig {
        endpoint: server.url(),
        request_timeout_ms: 2000,
        ..Default::default()
    };
    let pubsub = PubSubProvider::with_credentials(config, Arc::new(StaticToken("test-token")));
    pubsub.connect("gcp://billing").await.unwrap();
    pubsub.publish("orders", b"hello").await.unwrap();

    probe.assert_async().await;
    lookup.assert_async().await;
    publish.assert_async().await;
}
