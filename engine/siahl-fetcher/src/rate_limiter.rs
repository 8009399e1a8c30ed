//! Per-origin token bucket rate limiting for outbound requests

use crate::config::RateLimitConfig;
use crate::error::FetchError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Proof that a request slot was granted for an origin
#[derive(Debug, Clone)]
pub struct Permit {
    pub origin: String,
    /// Time spent queued before the token was granted
    pub waited: Duration,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

#[derive(Debug)]
struct OriginBucket {
    // tokio's Mutex queues lockers in FIFO order, which gives waiter fairness
    state: Mutex<BucketState>,
    waiting: AtomicUsize,
}

/// Decrements the waiter count when the caller leaves the queue, including on cancellation
struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Token bucket rate limiter partitioned by origin
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Arc<OriginBucket>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: DashMap::new() }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn bucket(&self, origin: &str) -> Arc<OriginBucket> {
        if let Some(bucket) = self.buckets.get(origin) {
            return Arc::clone(bucket.value());
        }

        let capacity = self.config.burst as f64;
        let bucket = self.buckets.entry(origin.to_string()).or_insert_with(|| {
            Arc::new(OriginBucket {
                state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
                waiting: AtomicUsize::new(0),
            })
        });
        Arc::clone(bucket.value())
    }

    /// Wait for a token on `origin`.
    ///
    /// Suspends until a token is available; waiters are served first-in-first-out.
    /// Fails fast with [`FetchError::Overloaded`] once `max_waiters` callers are
    /// already queued on the origin.
    pub async fn acquire(&self, origin: &str) -> Result<Permit, FetchError> {
        let bucket = self.bucket(origin);

        let queued = bucket.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaiterGuard(&bucket.waiting);
        if queued >= self.config.max_waiters {
            warn!("Rate limiter for {} overloaded ({} waiting)", origin, queued);
            return Err(FetchError::Overloaded { origin: origin.to_string(), waiters: queued });
        }

        let started = Instant::now();
        let rate = self.config.tokens_per_second;
        let capacity = self.config.burst as f64;

        let mut state = bucket.state.lock().await;
        state.refill(Instant::now(), rate, capacity);

        if state.tokens < 1.0 {
            let deficit = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(deficit / rate);
            debug!("Throttling request to {} for {:?}", origin, wait);
            sleep(wait).await;
            state.refill(Instant::now(), rate, capacity);
        }

        state.tokens = (state.tokens - 1.0).max(0.0);

        Ok(Permit { origin: origin.to_string(), waited: started.elapsed() })
    }

    /// Number of callers currently queued on `origin`
    pub fn waiting(&self, origin: &str) -> usize {
        self.buckets.get(origin).map(|b| b.waiting.load(Ordering::SeqCst)).unwrap_or(0)
    }
}
