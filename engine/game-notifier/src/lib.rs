//! Game Notifier
//!
//! Detects notification-worthy changes in fetched league data and delivers
//! them to recipients at most once.
//!
//! - [`detector`]: compare-and-commit diffing of tracked game state
//! - [`dispatcher`]: idempotent delivery backed by the append-only notification log
//! - [`channel`]: outbound transports (webhook, log)

pub mod channel;
pub mod config;
pub mod content;
pub mod detector;
pub mod dispatcher;
pub mod event;
pub mod metrics;

pub use channel::{create_channel, ChannelError, LogChannel, NotificationChannel, WebhookChannel};
pub use config::{ChannelConfig, ChannelKind, DispatchConfig, WebhookConfig};
pub use content::render_message;
pub use detector::{compare_and_commit, detect, schedule_events, Change, EventDetector};
pub use dispatcher::{DispatchOutcome, Dispatcher, FailureReason};
pub use event::{value_hash, DetectedEvent, EventPayload};
pub use metrics::{DispatchMetrics, DispatchMetricsSnapshot};
