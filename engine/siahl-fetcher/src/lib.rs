//! SIAHL Stats Fetcher
//!
//! Retrieves league pages from the SIAHL stats site and turns them into
//! structured records. Outbound requests are rate limited per origin and
//! retried with exponential backoff on transient failures.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod rate_limiter;
pub mod transport;

pub use config::{FetcherConfig, RateLimitConfig, RetryConfig};
pub use error::{FetchError, Result, TransportError};
pub use fetcher::{ResourceFetcher, StatsFetcher};
pub use metrics::{AtomicCounter, FetcherMetrics, FetcherMetricsSnapshot};
pub use models::*;
pub use parser::{parse_document, ParseContext};
pub use rate_limiter::{Permit, RateLimiter};
pub use transport::{HttpTransport, Transport};
