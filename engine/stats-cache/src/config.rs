use persistence::CacheTier;
use serde::{Deserialize, Serialize};
use siahl_fetcher::{ResourceDescriptor, ResourceKind};

/// Time-to-live per cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTtls {
    /// Locker rooms and other same-day data
    pub short_term_secs: u64,
    /// Standings, schedules and player stats for the current season
    pub stats_secs: u64,
    /// Past seasons
    pub historical_secs: u64,
}

impl Default for TierTtls {
    fn default() -> Self {
        Self {
            short_term_secs: 60 * 60,
            stats_secs: 6 * 60 * 60,
            historical_secs: 24 * 60 * 60,
        }
    }
}

impl TierTtls {
    pub fn ttl(&self, tier: CacheTier) -> chrono::Duration {
        let secs = match tier {
            CacheTier::ShortTerm => self.short_term_secs,
            CacheTier::Stats => self.stats_secs,
            CacheTier::Historical => self.historical_secs,
        };
        chrono::Duration::seconds(secs as i64)
    }
}

/// Configuration for the cache store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttls: TierTtls,

    /// Season currently in play; earlier seasons are cached as historical
    pub current_season: Option<u32>,

    /// Return the stale payload when a refresh fails on a network error
    pub serve_stale_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttls: TierTtls::default(), current_season: None, serve_stale_on_error: true }
    }
}

impl CacheConfig {
    /// Tier a descriptor is cached under
    pub fn tier_for(&self, descriptor: &ResourceDescriptor) -> CacheTier {
        if let (Some(season), Some(current)) = (descriptor.season(), self.current_season) {
            if season < current {
                return CacheTier::Historical;
            }
        }

        match descriptor.kind() {
            ResourceKind::LockerRoom => CacheTier::ShortTerm,
            ResourceKind::TeamList | ResourceKind::Schedule | ResourceKind::PlayerStats => {
                CacheTier::Stats
            }
        }
    }
}
