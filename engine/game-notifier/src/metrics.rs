// Metrics collection for notification dispatch

use serde::Serialize;
use siahl_fetcher::AtomicCounter;

/// Dispatch outcome counters. Suppressions are counted apart from sends and failures.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub sent_total: AtomicCounter,
    pub suppressed_total: AtomicCounter,
    pub failed_total: AtomicCounter,
    pub delivery_retries_total: AtomicCounter,
    pub cooling_down_total: AtomicCounter,
    /// Delivered but the log write failed
    pub record_errors_total: AtomicCounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchMetricsSnapshot {
    pub sent_total: u64,
    pub suppressed_total: u64,
    pub failed_total: u64,
    pub delivery_retries_total: u64,
    pub cooling_down_total: u64,
    pub record_errors_total: u64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            sent_total: self.sent_total.get(),
            suppressed_total: self.suppressed_total.get(),
            failed_total: self.failed_total.get(),
            delivery_retries_total: self.delivery_retries_total.get(),
            cooling_down_total: self.cooling_down_total.get(),
            record_errors_total: self.record_errors_total.get(),
        }
    }
}
