//! Google Cloud Pub/Sub provider implementation
//!
//! Speaks the Pub/Sub v1 REST API, which the official emulator also serves.
//! Topics and the derived `<topic>-subscription` are created on demand.
//! Delivery is a pull loop per subscription that acknowledges every message
//! right after the handler returns, so handler failures never cause
//! redelivery.
//!
//! Requests to Google endpoints carry a bearer token from application default
//! credentials (`gcp_auth`). Emulator and plain `http://` targets are called
//! without one.

use crate::messaging::config::PubSubConfig;
use crate::messaging::delivery::DeliveryTask;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics;
use crate::messaging::traits::{MessageHandler, MessagingProvider, ProviderType};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const PROVIDER: &str = "PubSub";

/// Emulator addresses recognized verbatim
const EMULATOR_URLS: [&str; 3] = ["localhost:8085", "127.0.0.1:8085", "pubsub-emulator:8085"];

/// Pause after an empty or failed pull
const PULL_BACKOFF: Duration = Duration::from_millis(500);

/// OAuth scope covering every Pub/Sub call
const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// Supplies OAuth bearer tokens for Google endpoints
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> MessagingResult<String>;
}

/// Application default credentials resolved through `gcp_auth`
pub struct DefaultCredentials {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl DefaultCredentials {
    /// Look up credentials from the environment, gcloud config or metadata server
    pub async fn discover() -> MessagingResult<Self> {
        let provider = gcp_auth::provider().await.map_err(|e| {
            MessagingError::ConnectionFailed(format!(
                "failed to load Google application default credentials: {}",
                e
            ))
        })?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl AccessTokenSource for DefaultCredentials {
    async fn access_token(&self) -> MessagingResult<String> {
        let token = self.provider.token(&[PUBSUB_SCOPE]).await.map_err(|e| {
            MessagingError::ConnectionFailed(format!("failed to obtain Google access token: {}", e))
        })?;
        Ok(token.as_str().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Auth(#[from] MessagingError),
}

impl ApiError {
    fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Http(e) if e.is_timeout())
    }
}

/// Where a Pub/Sub connection URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubTarget {
    /// REST endpoint without trailing slash
    pub endpoint: String,
    pub project: String,
    /// Requests need a Google bearer token
    pub authenticated: bool,
}

/// True for the emulator host:port literals
pub fn is_emulator_url(url: &str) -> bool {
    EMULATOR_URLS.contains(&url)
}

/// Resolve endpoint and project for `url`, consulting `GOOGLE_CLOUD_PROJECT`
/// and `PUBSUB_EMULATOR_HOST`
pub fn resolve_target(url: &str, config: &PubSubConfig) -> PubSubTarget {
    resolve_target_with_env(
        url,
        config,
        std::env::var("GOOGLE_CLOUD_PROJECT").ok(),
        std::env::var("PUBSUB_EMULATOR_HOST").ok(),
    )
}

/// Project id precedence: `gcp://` prefix, bare project id, emulator literal,
/// environment, configured default. An `http(s)://host[/project]` URL names a
/// REST endpoint directly. Only the configured endpoint and `https://` URLs
/// are authenticated.
pub fn resolve_target_with_env(
    url: &str,
    config: &PubSubConfig,
    env_project: Option<String>,
    env_emulator: Option<String>,
) -> PubSubTarget {
    let url = url.trim();
    let fallback_project = || {
        env_project
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| config.default_project.clone())
    };
    let env_emulator = env_emulator.filter(|h| !h.is_empty());
    let default_target = |project: String| match env_emulator.as_deref() {
        Some(host) => PubSubTarget {
            endpoint: format!("http://{}", host),
            project,
            authenticated: false,
        },
        None => PubSubTarget {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project,
            authenticated: true,
        },
    };

    if url.is_empty() {
        return default_target(config.default_project.clone());
    }

    if let Some(project) = url.strip_prefix("gcp://") {
        return default_target(project.trim_end_matches('/').to_string());
    }

    if !url.contains(':') && !url.contains('/') {
        return default_target(url.to_string());
    }

    if is_emulator_url(url) {
        let host = if url == "pubsub-emulator:8085" {
            "localhost:8085"
        } else {
            url
        };
        return PubSubTarget {
            endpoint: format!("http://{}", host),
            project: config.default_project.clone(),
            authenticated: false,
        };
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        let (endpoint, project) = match url[scheme_end..].find('/') {
            Some(slash) => {
                let split = scheme_end + slash;
                (&url[..split], url[split + 1..].trim_matches('/'))
            }
            None => (url, ""),
        };
        return PubSubTarget {
            endpoint: endpoint.to_string(),
            project: if project.is_empty() {
                fallback_project()
            } else {
                project.to_string()
            },
            authenticated: url.starts_with("https://"),
        };
    }

    default_target(fallback_project())
}

/// Name of the subscription derived from a topic
pub fn subscription_name(topic: &str) -> String {
    format!("{}-subscription", topic)
}

#[derive(Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest {
    ack_ids: Vec<String>,
}

#[derive(Serialize)]
struct SubscriptionRequest {
    topic: String,
}

/// Thin REST client bound to one project
#[derive(Clone)]
struct PubSubApi {
    http: reqwest::Client,
    target: PubSubTarget,
    credentials: Option<Arc<dyn AccessTokenSource>>,
    max_messages: u32,
    known_topics: Arc<Mutex<HashSet<String>>>,
}

impl PubSubApi {
    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.target.project, topic)
    }

    fn subscription_path(&self, subscription: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.target.project, subscription)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.target.endpoint, path)
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ApiError> {
        match self.credentials.as_ref() {
            Some(credentials) => Ok(request.bearer_auth(credentials.access_token().await?)),
            None => Ok(request),
        }
    }

    /// One cheap authenticated round trip
    async fn probe(&self) -> Result<(), ApiError> {
        let request = self
            .http
            .get(self.url(&format!("projects/{}/topics", self.target.project)))
            .query(&[("pageSize", "1")]);
        self.authorize(request)
            .await?
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, ApiError> {
        let response = self.authorize(self.http.get(self.url(path))).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    /// PUT a resource; a concurrent creator winning the race is fine
    async fn create<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let request = self.http.put(self.url(path)).json(body);
        let response = self.authorize(request).await?.send().await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn ensure_topic(&self, topic: &str) -> MessagingResult<String> {
        let path = self.topic_path(topic);
        if self.known_topics.lock().contains(topic) {
            return Ok(path);
        }

        let exists = self.exists(&path).await.map_err(|e| {
            MessagingError::SubscribeFailed(format!("failed to check if topic {} exists: {}", topic, e))
        })?;
        if !exists {
            self.create(&path, &serde_json::json!({})).await.map_err(|e| {
                MessagingError::SubscribeFailed(format!("failed to create topic {}: {}", topic, e))
            })?;
            tracing::info!(topic = %topic, "Created Pub/Sub topic");
        }

        self.known_topics.lock().insert(topic.to_string());
        Ok(path)
    }

    async fn ensure_subscription(&self, subscription: &str, topic_path: &str) -> MessagingResult<()> {
        let path = self.subscription_path(subscription);

        let exists = self.exists(&path).await.map_err(|e| {
            MessagingError::SubscribeFailed(format!(
                "failed to check if subscription {} exists: {}",
                subscription, e
            ))
        })?;
        if !exists {
            let body = SubscriptionRequest {
                topic: topic_path.to_string(),
            };
            self.create(&path, &body).await.map_err(|e| {
                MessagingError::SubscribeFailed(format!(
                    "failed to create subscription {}: {}",
                    subscription, e
                ))
            })?;
            tracing::info!(subscription = %subscription, "Created Pub/Sub subscription");
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, data: &[u8]) -> Result<String, ApiError> {
        let body = PublishRequest {
            messages: vec![OutgoingMessage {
                data: BASE64.encode(data),
            }],
        };
        let request = self
            .http
            .post(self.url(&format!("{}:publish", self.topic_path(topic))))
            .json(&body);
        let response: PublishResponse = self
            .authorize(request)
            .await?
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.message_ids.into_iter().next().unwrap_or_default())
    }

    async fn pull(&self, subscription: &str) -> Result<Vec<ReceivedMessage>, ApiError> {
        let body = PullRequest {
            max_messages: self.max_messages,
        };
        let request = self
            .http
            .post(self.url(&format!("{}:pull", self.subscription_path(subscription))))
            .json(&body);
        let response: PullResponse = self
            .authorize(request)
            .await?
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.received_messages)
    }

    async fn acknowledge(&self, subscription: &str, ack_id: String) -> Result<(), ApiError> {
        let body = AcknowledgeRequest {
            ack_ids: vec![ack_id],
        };
        let request = self
            .http
            .post(self.url(&format!("{}:acknowledge", self.subscription_path(subscription))))
            .json(&body);
        self.authorize(request)
            .await?
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

async fn pause(cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(PULL_BACKOFF) => {}
    }
}

async fn receive_loop(
    api: PubSubApi,
    topic: String,
    subscription: String,
    handler: MessageHandler,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let pulled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            pulled = api.pull(&subscription) => pulled,
        };

        let messages = match pulled {
            Ok(messages) => messages,
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                tracing::warn!(subscription = %subscription, error = %e, "Error receiving Pub/Sub messages");
                pause(&cancel).await;
                continue;
            }
        };

        if messages.is_empty() {
            pause(&cancel).await;
            continue;
        }

        for received in messages {
            match BASE64.decode(received.message.data.as_bytes()) {
                Ok(data) => {
                    metrics::record_received(PROVIDER);
                    handler(topic.as_str(), data.as_slice());
                }
                Err(e) => tracing::warn!(
                    subscription = %subscription,
                    message_id = %received.message.message_id,
                    error = %e,
                    "Dropping Pub/Sub message with undecodable payload"
                ),
            }
            if let Err(e) = api.acknowledge(&subscription, received.ack_id).await {
                tracing::warn!(subscription = %subscription, error = %e, "Failed to acknowledge Pub/Sub message");
            }
        }
    }
    tracing::debug!(subscription = %subscription, "Pub/Sub receive loop stopped");
}

#[derive(Default)]
struct PubSubState {
    api: Option<PubSubApi>,
    subscriptions: HashMap<String, DeliveryTask>,
}

/// Pub/Sub provider over the REST API
pub struct PubSubProvider {
    config: PubSubConfig,
    credentials: Option<Arc<dyn AccessTokenSource>>,
    state: RwLock<PubSubState>,
}

impl PubSubProvider {
    /// Create a new, unconnected Pub/Sub provider that discovers application
    /// default credentials when it first connects to a Google endpoint
    pub fn new(config: PubSubConfig) -> Self {
        Self {
            config,
            credentials: None,
            state: RwLock::new(PubSubState::default()),
        }
    }

    /// Create a provider that authenticates with `credentials`
    pub fn with_credentials(config: PubSubConfig, credentials: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            config,
            credentials: Some(credentials),
            state: RwLock::new(PubSubState::default()),
        }
    }

    /// Project of the live connection, if any
    pub async fn project_id(&self) -> Option<String> {
        let state = self.state.read().await;
        state.api.as_ref().map(|api| api.target.project.clone())
    }
}

#[async_trait]
impl MessagingProvider for PubSubProvider {
    async fn connect(&self, url: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.api.is_some() {
            tracing::debug!(url = %url, "Pub/Sub provider already connected");
            return Ok(());
        }

        let target = resolve_target(url, &self.config);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .build()
            .map_err(|e| MessagingError::ConnectionFailed(format!("failed to create pubsub client: {}", e)))?;

        let credentials = if !target.authenticated {
            None
        } else if let Some(credentials) = self.credentials.clone() {
            Some(credentials)
        } else {
            Some(Arc::new(DefaultCredentials::discover().await?) as Arc<dyn AccessTokenSource>)
        };

        let api = PubSubApi {
            http,
            target,
            credentials,
            max_messages: self.config.max_messages.max(1),
            known_topics: Arc::new(Mutex::new(HashSet::new())),
        };

        api.probe().await.map_err(|e| {
            MessagingError::ConnectionFailed(format!(
                "failed to reach Pub/Sub at {} (project {}): {}",
                api.target.endpoint, api.target.project, e
            ))
        })?;

        tracing::info!(
            endpoint = %api.target.endpoint,
            project = %api.target.project,
            "Connected to Google Cloud Pub/Sub"
        );
        state.api = Some(api);
        metrics::connection_opened(PROVIDER);
        Ok(())
    }

    async fn publish(&self, subject: &str, data: &[u8]) -> MessagingResult<()> {
        let api = {
            let state = self.state.read().await;
            state
                .api
                .clone()
                .ok_or(MessagingError::NotConnected(ProviderType::PubSub))?
        };

        api.ensure_topic(subject).await.map_err(|e| match e {
            MessagingError::SubscribeFailed(msg) => MessagingError::PublishFailed(msg),
            other => other,
        })?;

        let result = api.publish(subject, data).await.map_err(|e| {
            MessagingError::PublishFailed(format!("failed to publish message to {}: {}", subject, e))
        });
        metrics::record_publish(PROVIDER, &result);
        let message_id = result?;

        tracing::debug!(topic = %subject, message_id = %message_id, "Published Pub/Sub message");
        Ok(())
    }

    async fn subscribe(&self, subject_pattern: &str, handler: MessageHandler) -> MessagingResult<()> {
        let mut state = self.state.write().await;
        let api = state
            .api
            .clone()
            .ok_or(MessagingError::NotConnected(ProviderType::PubSub))?;

        if state.subscriptions.contains_key(subject_pattern) {
            return Err(MessagingError::AlreadySubscribed(subject_pattern.to_string()));
        }

        let subscription = subscription_name(subject_pattern);
        let topic_path = api.ensure_topic(subject_pattern).await?;
        api.ensure_subscription(&subscription, &topic_path).await?;

        let topic = subject_pattern.to_string();
        let task = DeliveryTask::spawn(move |cancel| receive_loop(api, topic, subscription, handler, cancel));
        state.subscriptions.insert(subject_pattern.to_string(), task);

        tracing::info!(topic = %subject_pattern, "Subscribed to Pub/Sub topic");
        Ok(())
    }

    async fn unsubscribe(&self, subject_pattern: &str) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.api.is_none() {
            return Err(MessagingError::NotConnected(ProviderType::PubSub));
        }

        // The cloud-side subscription stays; other consumers may share it.
        let task = state
            .subscriptions
            .remove(subject_pattern)
            .ok_or_else(|| MessagingError::NotSubscribed(subject_pattern.to_string()))?;
        task.stop();

        tracing::info!(topic = %subject_pattern, "Unsubscribed from Pub/Sub topic");
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        let mut state = self.state.write().await;

        if state.api.take().is_none() {
            return Ok(());
        }

        for (topic, task) in state.subscriptions.drain() {
            task.stop();
            tracing::debug!(topic = %topic, "Stopped Pub/Sub receive loop");
        }
        metrics::connection_closed(PROVIDER);

        tracing::info!("Disconnected from Google Cloud Pub/Sub");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.api.is_some()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::PubSub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(url: &str) -> PubSubTarget {
        resolve_target_with_env(url, &PubSubConfig::default(), None, None)
    }

    #[test]
    fn test_gcp_prefix_names_project() {
        let target = resolve("gcp://billing-prod");
        assert_eq!(target.project, "billing-prod");
        assert_eq!(target.endpoint, "https://pubsub.googleapis.com");
        assert!(target.authenticated);
    }

    #[test]
    fn test_bare_project_id() {
        assert_eq!(resolve("my-gcp-project").project, "my-gcp-project");
    }

    #[test]
    fn test_emulator_literals() {
        let target = resolve("127.0.0.1:8085");
        assert_eq!(target.endpoint, "http://127.0.0.1:8085");
        assert_eq!(target.project, "dev-local");

        let docker = resolve("pubsub-emulator:8085");
        assert_eq!(docker.endpoint, "http://localhost:8085");
        assert!(!target.authenticated);
        assert!(!docker.authenticated);
        assert!(is_emulator_url("localhost:8085"));
        assert!(!is_emulator_url("localhost:8086"));
    }

    #[test]
    fn test_environment_fallbacks() {
        let config = PubSubConfig::default();
        let target = resolve_target_with_env(
            "somehost:9000",
            &config,
            Some("from-env".to_string()),
            Some("emulator:8681".to_string()),
        );
        assert_eq!(target.project, "from-env");
        assert_eq!(target.endpoint, "http://emulator:8681");
        assert!(!target.authenticated);

        let project = resolve_target_with_env("billing-prod", &config, None, Some("emulator:8681".to_string()));
        assert_eq!(project.endpoint, "http://emulator:8681");
        assert!(!project.authenticated);

        assert_eq!(resolve("somehost:9000").project, "dev-local");
        assert_eq!(resolve("").project, "dev-local");
    }

    #[test]
    fn test_explicit_http_endpoint() {
        let target = resolve("http://127.0.0.1:4000/demo");
        assert_eq!(target.endpoint, "http://127.0.0.1:4000");
        assert_eq!(target.project, "demo");
        assert!(!target.authenticated);

        assert_eq!(resolve("http://127.0.0.1:4000").project, "dev-local");
        assert!(resolve("https://pubsub.example.com/demo").authenticated);
    }

    #[test]
    fn test_subscription_name() {
        assert_eq!(subscription_name("orders"), "orders-subscription");
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let pubsub = PubSubProvider::new(PubSubConfig::default());
        let handler: MessageHandler = Arc::new(|_: &str, _: &[u8]| {});

        assert!(pubsub.publish("orders", b"x").await.unwrap_err().is_not_connected());
        assert!(pubsub.subscribe("orders", handler).await.unwrap_err().is_not_connected());
        assert!(pubsub.unsubscribe("orders").await.unwrap_err().is_not_connected());
        assert!(pubsub.close().await.is_ok());
        assert!(pubsub.project_id().await.is_none());
    }
}
