use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery retry and cooldown policy of the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Delivery attempts per dispatch, including the first
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff
    pub max_backoff_ms: u64,

    /// How long a (recipient, event type) pair is skipped after a failed dispatch
    pub cooldown_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 500, max_backoff_ms: 5_000, cooldown_secs: 15 * 60 }
    }
}

impl DispatchConfig {
    /// Backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Which outbound channel to deliver through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Write messages to the log only
    Log,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// URL messages are POSTed to
    pub url: String,

    /// Optional bearer token
    pub auth_token: Option<String>,

    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { url: String::new(), auth_token: None, timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub webhook: WebhookConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { kind: ChannelKind::Log, webhook: WebhookConfig::default() }
    }
}
