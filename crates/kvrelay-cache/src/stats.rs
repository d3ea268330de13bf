//! Cache statistics snapshot.

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of cache counters and occupancy.
///
/// Hit/miss/eviction counters are cumulative for the life of the cache and
/// survive `clear()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub caching_enabled: bool,
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Estimated bytes held by both tiers
    pub memory_usage: usize,
    /// Current number of entries in L1
    pub l1_size: usize,
    /// Current number of entries in L2
    pub l2_size: usize,
    pub l1_capacity: usize,
    pub l2_capacity: usize,
    /// Percent of L1 capacity in use
    pub l1_utilization: f64,
    /// Percent of L2 capacity in use
    pub l2_utilization: f64,
}

impl CacheStats {
    /// Total lookups answered by either tier.
    pub const fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits
    }

    /// Total lookups, each counted once.
    pub const fn lookups(&self) -> u64 {
        self.l1_hits + self.l1_misses
    }

    /// Fraction of lookups served from cache, in `0.0..=1.0`.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / lookups as f64
        }
    }

    /// Share of hits that had to be promoted from L2.
    #[allow(clippy::cast_precision_loss)]
    pub fn l2_hit_share(&self) -> f64 {
        let hits = self.hits();
        if hits == 0 {
            0.0
        } else {
            self.l2_hits as f64 / hits as f64
        }
    }
}
