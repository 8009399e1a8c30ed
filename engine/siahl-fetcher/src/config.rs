use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the SIAHL stats fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Base URL of the stats site (e.g., "https://stats.sharksice.timetoscore.com")
    pub base_url: String,

    /// Identification string sent as `User-Agent` on every request
    pub user_agent: String,

    /// Upper bound for a single request attempt in seconds
    pub request_timeout_secs: u64,

    /// Default league ID
    pub league_id: u32,

    /// Current season number
    pub season: u32,

    /// Stat class used for schedule and player stats pages
    pub stat_class: u32,

    /// IANA timezone the league publishes game times in
    pub league_timezone: String,

    /// Token bucket configuration
    pub rate_limit: RateLimitConfig,

    /// Retry configuration
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Token refill rate per origin
    pub tokens_per_second: f64,

    /// Bucket capacity (burst size)
    pub burst: u32,

    /// Maximum callers waiting on one origin before new requests fail fast
    pub max_waiters: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Cap on a single backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Upper bound of the random jitter added to each delay in milliseconds
    pub jitter_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stats.sharksice.timetoscore.com".to_string(),
            user_agent: "SIAHL-Bot/1.0".to_string(),
            request_timeout_secs: 30,
            league_id: 1,
            season: 72,
            stat_class: 1,
            league_timezone: "America/Los_Angeles".to_string(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { tokens_per_second: 2.0, burst: 4, max_waiters: 64 }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl FetcherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse the configured league timezone
    pub fn timezone(&self) -> Result<chrono_tz::Tz, crate::FetchError> {
        self.league_timezone.parse::<chrono_tz::Tz>().map_err(|_| {
            crate::FetchError::config(format!("Unknown timezone: {}", self.league_timezone))
        })
    }
}

impl RetryConfig {
    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff before retry number `retry` (1-based): exponential, capped, plus jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64) as u64;

        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}
