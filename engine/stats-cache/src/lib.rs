//! Stats Cache
//!
//! Tiered-TTL key/value store over parsed stats pages. Entries are replaced
//! wholesale on every successful fetch and are never evicted; staleness only
//! decides when to refetch. Concurrent refreshes of one key share a single
//! upstream fetch.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::{CacheConfig, TierTtls};
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use persistence::CacheTier;
pub use store::{CacheMetrics, CacheMetricsSnapshot, CacheStore, CachedPayload};
