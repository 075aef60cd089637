//! Webhook notifier: JSON POST per event.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use super::{NotificationEvent, Notifier};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build webhook client: {e}")))?;
        Ok(Self { config, client })
    }

    fn build_payload(&self, event: &NotificationEvent) -> serde_json::Value {
        json!({
            "event_type": event.event_type(),
            "title": event.title(),
            "timestamp": event.timestamp().to_rfc3339(),
            "data": event,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let mut request = self.client.post(&self.config.url).json(&self.build_payload(event));
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::Other(format!("Webhook failed: {status} - {body}")));
        }

        debug!("Webhook notification sent: {}", event.event_type());
        Ok(())
    }
}
