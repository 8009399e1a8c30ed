// Metrics collection for the fetcher

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe atomic counter
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for outbound fetch activity
#[derive(Debug, Default)]
pub struct FetcherMetrics {
    /// Transport attempts issued (each retry counts)
    pub requests_total: AtomicCounter,
    /// Retries scheduled after a transient failure
    pub retries_total: AtomicCounter,
    /// Fetches that ended in a terminal network error
    pub network_failures_total: AtomicCounter,
    /// Responses that did not match the expected structure
    pub parse_failures_total: AtomicCounter,
    /// Requests shed by the rate limiter
    pub overloaded_total: AtomicCounter,
    /// Successful logical fetches
    pub fetches_succeeded_total: AtomicCounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetcherMetricsSnapshot {
    pub requests_total: u64,
    pub retries_total: u64,
    pub network_failures_total: u64,
    pub parse_failures_total: u64,
    pub overloaded_total: u64,
    pub fetches_succeeded_total: u64,
}

impl FetcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FetcherMetricsSnapshot {
        FetcherMetricsSnapshot {
            requests_total: self.requests_total.get(),
            retries_total: self.retries_total.get(),
            network_failures_total: self.network_failures_total.get(),
            parse_failures_total: self.parse_failures_total.get(),
            overloaded_total: self.overloaded_total.get(),
            fetches_succeeded_total: self.fetches_succeeded_total.get(),
        }
    }
}
