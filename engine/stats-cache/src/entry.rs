use crate::config::TierTtls;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use persistence::{CacheTier, StoredCacheEntry};
use siahl_fetcher::{ResourceDescriptor, StructuredData};

/// One cached payload. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: ResourceDescriptor,
    pub payload: StructuredData,
    pub fetched_at: DateTime<Utc>,
    pub tier: CacheTier,
}

impl CacheEntry {
    pub fn stale_after(&self, ttls: &TierTtls) -> DateTime<Utc> {
        self.fetched_at + ttls.ttl(self.tier)
    }

    /// Stale from `stale_after` onward, inclusive
    pub fn is_stale_at(&self, now: DateTime<Utc>, ttls: &TierTtls) -> bool {
        now >= self.stale_after(ttls)
    }

    pub fn to_stored(&self) -> Result<StoredCacheEntry> {
        Ok(StoredCacheEntry {
            key: self.key.cache_key(),
            descriptor: serde_json::to_value(&self.key).map_err(CacheError::codec)?,
            payload: serde_json::to_value(&self.payload).map_err(CacheError::codec)?,
            tier: self.tier,
            fetched_at: self.fetched_at,
        })
    }

    pub fn from_stored(stored: StoredCacheEntry) -> Result<Self> {
        Ok(Self {
            key: serde_json::from_value(stored.descriptor).map_err(CacheError::codec)?,
            payload: serde_json::from_value(stored.payload).map_err(CacheError::codec)?,
            fetched_at: stored.fetched_at,
            tier: stored.tier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn entry(tier: CacheTier) -> CacheEntry {
        CacheEntry {
            key: ResourceDescriptor::LockerRoom {
                date: NaiveDate::from_ymd_opt(2024, 9, 10).unwrap(),
            },
            payload: StructuredData::LockerRooms(vec![]),
            fetched_at: Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap(),
            tier,
        }
    }

    #[test]
    fn test_staleness_boundary_is_inclusive() {
        let ttls = TierTtls::default();
        for tier in [CacheTier::ShortTerm, CacheTier::Stats, CacheTier::Historical] {
            let entry = entry(tier);
            let stale_after = entry.stale_after(&ttls);
            assert_eq!(stale_after, entry.fetched_at + ttls.ttl(tier));

            assert!(!entry.is_stale_at(stale_after - Duration::milliseconds(1), &ttls));
            assert!(entry.is_stale_at(stale_after, &ttls));
            assert!(entry.is_stale_at(stale_after + Duration::seconds(1), &ttls));
        }
    }

    #[test]
    fn test_stored_form_is_keyed_by_cache_key() {
        let entry = entry(CacheTier::ShortTerm);
        let stored = entry.to_stored().unwrap();
        assert_eq!(stored.key, "locker_room:2024-09-10");
        assert_eq!(CacheEntry::from_stored(stored).unwrap(), entry);
    }
}
