//! Outbound notification channels

use crate::config::{ChannelConfig, ChannelKind, WebhookConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The message could not reach the destination
    #[error("Delivery failed: {0}")]
    Transport(String),

    /// The destination answered with a non-success status
    #[error("Delivery rejected with HTTP status {0}")]
    Rejected(u16),

    #[error("Channel configuration error: {0}")]
    Config(String),
}

/// Delivers rendered messages to a user or group destination
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, content: &str) -> Result<(), ChannelError>;
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    recipient_id: &'a str,
    content: &'a str,
}

/// POSTs `{recipient_id, content}` as JSON to a configured URL
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Result<Self, ChannelError> {
        if config.url.is_empty() {
            return Err(ChannelError::Config("webhook url is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChannelError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, recipient: &str, content: &str) -> Result<(), ChannelError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&WebhookMessage { recipient_id: recipient, content });

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("Webhook send failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Logs messages instead of delivering them
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, recipient: &str, content: &str) -> Result<(), ChannelError> {
        info!(recipient = %recipient, "Notification:\n{}", content);
        Ok(())
    }
}

/// Build the channel selected by `config`
pub fn create_channel(config: &ChannelConfig) -> Result<Arc<dyn NotificationChannel>, ChannelError> {
    let channel: Arc<dyn NotificationChannel> = match config.kind {
        ChannelKind::Log => Arc::new(LogChannel),
        ChannelKind::Webhook => Arc::new(WebhookChannel::new(config.webhook.clone())?),
    };
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_requires_url() {
        let result = WebhookChannel::new(WebhookConfig::default());
        assert!(matches!(result, Err(ChannelError::Config(_))));
    }

    #[test]
    fn test_webhook_message_shape() {
        let body =
            serde_json::to_value(WebhookMessage { recipient_id: "-1001", content: "hi" }).unwrap();
        assert_eq!(body, serde_json::json!({"recipient_id": "-1001", "content": "hi"}));
    }

    #[tokio::test]
    async fn test_create_log_channel() {
        let channel = create_channel(&ChannelConfig::default()).unwrap();
        assert_eq!(channel.name(), "log");
        assert!(channel.send("1", "hello").await.is_ok());
    }
}
