//! Tiered-TTL cache store with single-flight refresh

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use persistence::{CacheTier, PersistenceBackend};
use serde::Serialize;
use siahl_fetcher::{AtomicCounter, ResourceDescriptor, ResourceFetcher, StructuredData};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Flight = Shared<BoxFuture<'static, Result<Arc<CacheEntry>>>>;

/// Result of a cache read
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub entry: CacheEntry,
    pub is_stale: bool,
}

/// Cache activity counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicCounter,
    pub stale_reads: AtomicCounter,
    pub misses: AtomicCounter,
    pub refreshes: AtomicCounter,
    pub joined_refreshes: AtomicCounter,
    pub refresh_failures: AtomicCounter,
    pub stale_served_on_error: AtomicCounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub stale_reads: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub joined_refreshes: u64,
    pub refresh_failures: u64,
    pub stale_served_on_error: u64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.get(),
            stale_reads: self.stale_reads.get(),
            misses: self.misses.get(),
            refreshes: self.refreshes.get(),
            joined_refreshes: self.joined_refreshes.get(),
            refresh_failures: self.refresh_failures.get(),
            stale_served_on_error: self.stale_served_on_error.get(),
        }
    }
}

/// Cache of parsed stats pages over a persistence backend.
///
/// Concurrent refreshes of the same key share a single fetch.
pub struct CacheStore {
    config: CacheConfig,
    backend: Arc<dyn PersistenceBackend>,
    fetcher: Arc<dyn ResourceFetcher>,
    in_flight: Arc<DashMap<String, Flight>>,
    metrics: Arc<CacheMetrics>,
}

impl CacheStore {
    pub fn new(
        config: CacheConfig,
        backend: Arc<dyn PersistenceBackend>,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        Self {
            config,
            backend,
            fetcher,
            in_flight: Arc::new(DashMap::new()),
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Read the cached payload and whether it is stale now
    pub async fn read(&self, descriptor: &ResourceDescriptor) -> Result<Option<CachedPayload>> {
        self.read_at(descriptor, Utc::now()).await
    }

    pub async fn read_at(
        &self,
        descriptor: &ResourceDescriptor,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedPayload>> {
        let stored = self
            .backend
            .load_cache_entry(&descriptor.cache_key())
            .await
            .map_err(CacheError::storage)?;

        let Some(stored) = stored else {
            return Ok(None);
        };

        let entry = CacheEntry::from_stored(stored)?;
        let is_stale = entry.is_stale_at(now, &self.config.ttls);
        Ok(Some(CachedPayload { entry, is_stale }))
    }

    /// Unconditionally overwrite the entry for `descriptor`
    pub async fn write(
        &self,
        descriptor: &ResourceDescriptor,
        payload: StructuredData,
        tier: CacheTier,
    ) -> Result<CacheEntry> {
        self.write_at(descriptor, payload, tier, Utc::now()).await
    }

    pub async fn write_at(
        &self,
        descriptor: &ResourceDescriptor,
        payload: StructuredData,
        tier: CacheTier,
        fetched_at: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry { key: descriptor.clone(), payload, fetched_at, tier };
        store_entry(self.backend.as_ref(), &entry).await?;
        Ok(entry)
    }

    /// Return the cached payload, refetching it first if missing or stale
    pub async fn get_or_refresh(&self, descriptor: &ResourceDescriptor) -> Result<StructuredData> {
        self.get_or_refresh_at(descriptor, Utc::now()).await
    }

    pub async fn get_or_refresh_at(
        &self,
        descriptor: &ResourceDescriptor,
        now: DateTime<Utc>,
    ) -> Result<StructuredData> {
        let cached = self.read_at(descriptor, now).await?;

        let stale = match cached {
            Some(cached) if !cached.is_stale => {
                self.metrics.hits.inc();
                return Ok(cached.entry.payload);
            }
            Some(cached) => {
                self.metrics.stale_reads.inc();
                Some(cached.entry)
            }
            None => {
                self.metrics.misses.inc();
                None
            }
        };

        match self.refresh(descriptor).await {
            Ok(entry) => Ok(entry.payload.clone()),
            Err(err) => match stale {
                Some(entry) if self.config.serve_stale_on_error && is_transient(&err) => {
                    self.metrics.stale_served_on_error.inc();
                    warn!("Serving stale {} after refresh failure: {}", descriptor, err);
                    Ok(entry.payload)
                }
                _ => Err(err),
            },
        }
    }

    /// Fetch and store `descriptor` regardless of staleness
    pub async fn force_refresh(&self, descriptor: &ResourceDescriptor) -> Result<StructuredData> {
        let entry = self.refresh(descriptor).await?;
        Ok(entry.payload.clone())
    }

    /// Single-flight fetch + write for one key
    async fn refresh(&self, descriptor: &ResourceDescriptor) -> Result<Arc<CacheEntry>> {
        let key = descriptor.cache_key();

        let flight = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                self.metrics.joined_refreshes.inc();
                debug!("Joining in-flight refresh of {}", key);
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                self.metrics.refreshes.inc();
                let flight = fetch_and_store(
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.backend),
                    Arc::clone(&self.in_flight),
                    Arc::clone(&self.metrics),
                    descriptor.clone(),
                    self.config.tier_for(descriptor),
                )
                .boxed()
                .shared();
                slot.insert(flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Number of refreshes currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

fn is_transient(err: &CacheError) -> bool {
    err.as_fetch().map_or(false, |e| e.is_network() || e.is_overloaded())
}

async fn store_entry(backend: &dyn PersistenceBackend, entry: &CacheEntry) -> Result<()> {
    let stored = entry.to_stored()?;
    backend.save_cache_entry(&stored).await.map_err(CacheError::storage)
}

async fn fetch_and_store(
    fetcher: Arc<dyn ResourceFetcher>,
    backend: Arc<dyn PersistenceBackend>,
    in_flight: Arc<DashMap<String, Flight>>,
    metrics: Arc<CacheMetrics>,
    descriptor: ResourceDescriptor,
    tier: CacheTier,
) -> Result<Arc<CacheEntry>> {
    let outcome = async {
        let payload = fetcher.fetch(&descriptor).await?;
        let entry = CacheEntry { key: descriptor.clone(), payload, fetched_at: Utc::now(), tier };
        store_entry(backend.as_ref(), &entry).await?;
        info!("Refreshed {} ({} records, tier {})", descriptor, entry.payload.len(), tier.as_str());
        Ok::<_, CacheError>(Arc::new(entry))
    }
    .await;

    if outcome.is_err() {
        metrics.refresh_failures.inc();
    }
    in_flight.remove(&descriptor.cache_key());
    outcome
}
