//! Session lifecycle notifications.
//!
//! Sinks are fire-and-forget. A sink that cannot deliver logs the problem
//! and returns; the session never observes the failure.
//!
//! Events:
//! - `session.started` - session moved to Running
//! - `session.cluster_batch_ready` - clusters were persisted
//! - `session.completed` - session finished
//! - `session.failed` - session failed and released its claims

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::model::SessionId;

/// Session event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Started,
    ClusterBatchReady,
    Completed,
    Failed,
}

impl SessionEventKind {
    /// Get the event type as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "session.started",
            Self::ClusterBatchReady => "session.cluster_batch_ready",
            Self::Completed => "session.completed",
            Self::Failed => "session.failed",
        }
    }
}

impl std::fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session_id: SessionId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind, session_id: SessionId, message: impl Into<String>) -> Self {
        Self {
            kind,
            session_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of session events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver an event. Must not fail the caller.
    async fn notify(&self, event: &SessionEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn notify(&self, _event: &SessionEvent) {}
}

/// Forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, event: &SessionEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("Event receiver dropped, discarding {}", event.kind);
        }
    }
}

/// Sends every event to each inner sink.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, event: &SessionEvent) {
        for sink in &self.sinks {
            sink.notify(event).await;
        }
    }
}

/// Webhook payload sent to external systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event type.
    pub event: String,
    /// Unique event ID.
    pub event_id: String,
    pub session_id: SessionId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Server version.
    pub version: String,
}

impl From<&SessionEvent> for WebhookPayload {
    fn from(event: &SessionEvent) -> Self {
        Self {
            event: event.kind.as_str().to_string(),
            event_id: uuid::Uuid::new_v4().to_string(),
            session_id: event.session_id,
            message: event.message.clone(),
            timestamp: event.timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// HMAC-SHA256 signature of `body`, formatted as `sha256=<hex>`.
pub fn compute_signature(secret: &str, body: &str) -> Option<String> {
    use hmac::{Hmac, Mac};
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body.as_bytes());
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Upper bound accepted for `notifications.max_retries`.
pub const MAX_WEBHOOK_RETRIES: u32 = 10;

const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Exponential backoff from 100ms, capped at 30s.
fn retry_delay(attempt: u32) -> Duration {
    let ms = 2u64
        .checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(100))
        .unwrap_or(MAX_RETRY_DELAY_MS);
    Duration::from_millis(ms.min(MAX_RETRY_DELAY_MS))
}

/// Posts events to webhook URLs from a background task.
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    urls: Arc<Vec<String>>,
    secret: Option<String>,
    max_retries: u32,
}

impl WebhookSink {
    pub fn new(config: &NotificationConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("coalesce/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            urls: Arc::new(config.webhooks.clone()),
            secret: config.secret.clone(),
            max_retries: config.max_retries,
        }
    }

    async fn deliver(&self, url: &str, payload: &WebhookPayload, body: &str) {
        for attempt in 0..=self.max_retries {
            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .header("X-Coalesce-Event", &payload.event)
                .header("X-Coalesce-Event-ID", &payload.event_id);

            if let Some(signature) = self
                .secret
                .as_deref()
                .and_then(|secret| compute_signature(secret, body))
            {
                request = request.header("X-Coalesce-Signature", signature);
            }

            match request.body(body.to_string()).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Webhook delivered: {} -> {}", payload.event, url);
                    return;
                }
                Ok(response) => {
                    warn!(
                        "Webhook delivery failed (attempt {}): {} -> {} - HTTP {}",
                        attempt + 1,
                        payload.event,
                        url,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!(
                        "Webhook delivery error (attempt {}): {} -> {} - {}",
                        attempt + 1,
                        payload.event,
                        url,
                        e
                    );
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(retry_delay(attempt)).await;
            }
        }

        warn!(
            "Webhook delivery gave up after {} attempts: {} -> {}",
            self.max_retries + 1,
            payload.event,
            url
        );
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, event: &SessionEvent) {
        if self.urls.is_empty() {
            return;
        }
        let payload = WebhookPayload::from(event);
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize webhook payload: {}", e);
                return;
            }
        };

        let sink = self.clone();
        tokio::spawn(async move {
            for url in sink.urls.iter() {
                sink.deliver(url, &payload, &body).await;
            }
        });
    }
}

/// Sink for the configured webhooks, or a [`NullSink`] when there are none.
pub fn create_sink(config: &NotificationConfig) -> Arc<dyn NotificationSink> {
    if config.webhooks.is_empty() {
        Arc::new(NullSink)
    } else {
        Arc::new(WebhookSink::new(config))
    }
}
