use crate::error::{NotificationError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use shared::config::WebhookConfig;
use shared::models::NotificationResult;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Delivers a payment outcome to the caller-supplied callback.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn dispatch(&self, callback_uri: &str, result: &NotificationResult) -> Result<()>;
}

/// JSON-over-HTTP POST delivery. Each outcome is sent once, no retries.
pub struct HttpWebhookDispatcher {
    client: reqwest::Client,
}

impl HttpWebhookDispatcher {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("solana-forwarder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotificationError::DeliveryFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn dispatch(&self, callback_uri: &str, result: &NotificationResult) -> Result<()> {
        let body = serde_json::to_vec(result)?;

        let response = self
            .client
            .post(callback_uri)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| NotificationError::DeliveryFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Callback {} rejected outcome for session {}: {}",
                callback_uri, result.session_id, status
            );
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(
            "Delivered outcome for session {} to {}",
            result.session_id, callback_uri
        );
        Ok(())
    }
}

/// Records deliveries instead of sending them.
#[derive(Default)]
pub struct MockWebhookDispatcher {
    delivered: RwLock<Vec<(String, NotificationResult)>>,
    fail: RwLock<bool>,
}

impl MockWebhookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following delivery fail.
    pub async fn set_failing(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    pub async fn delivered(&self) -> Vec<(String, NotificationResult)> {
        self.delivered.read().await.clone()
    }
}

#[async_trait]
impl WebhookDispatcher for MockWebhookDispatcher {
    async fn dispatch(&self, callback_uri: &str, result: &NotificationResult) -> Result<()> {
        if *self.fail.read().await {
            return Err(NotificationError::DeliveryFailed("mock failure".to_string()));
        }
        debug!("Mock webhook to {} for session {}", callback_uri, result.session_id);
        self.delivered
            .write()
            .await
            .push((callback_uri.to_string(), result.clone()));
        Ok(())
    }
}
