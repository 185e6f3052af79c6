//! Outbound notification delivery.
//!
//! The rest of the service talks to a [`NotificationSink`]; the
//! provided implementation posts JSON to a configured webhook. Tests
//! (and deployments without a webhook) use in-process sinks.

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub text: String,
    pub image: Option<String>,
    pub link: Option<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &Notification) -> Result<()>;
}

/// Posts notifications to a generic webhook endpoint.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, message: &Notification) -> Result<()> {
        #[derive(Serialize)]
        struct Payload<'a> {
            #[serde(flatten)]
            message: &'a Notification,
            source: &'a str,
            timestamp: String,
        }

        let payload = Payload {
            message,
            source: "strmbridge",
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| BridgeError::Notification(format!("HTTP error: {e}")))?;

        if !response.status().is_success() {
            return Err(BridgeError::Notification(format!(
                "Webhook returned {}",
                response.status()
            )));
        }

        debug!("Notification sent: {}", message.title);
        Ok(())
    }
}

/// Fallback sink that just logs; keeps message batching observable when
/// no webhook is configured.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &Notification) -> Result<()> {
        info!("📣 {} | {}", message.title, message.text.replace('\n', " | "));
        Ok(())
    }
}
