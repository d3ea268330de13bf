//! # Performance Report
//!
//! Pool and cache snapshots plus tuning recommendations.
//!
//! Recommendations look at a sliding window of samples. A condition is
//! "persistent" when it holds in every sample of a window of at least two,
//! so a single spike never triggers advice.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use kvrelay_cache::CacheStats;
use kvrelay_pool::PoolStats;
use serde::{Deserialize, Serialize};

/// L1 utilization treated as saturated, in percent.
pub const SATURATED_UTILIZATION: f64 = 90.0;

/// Share of hits coming from L2 above which L1 is considered too small.
pub const HIGH_L2_HIT_SHARE: f64 = 0.25;

/// Lookups needed before the hit rate is judged.
pub const MIN_LOOKUPS_FOR_HIT_RATE: u64 = 100;

/// Hit rate below which caching is reported as ineffective.
pub const LOW_HIT_RATE: f64 = 0.5;

/// Cache memory above which compression is suggested.
pub const COMPRESSION_MEMORY_BYTES: usize = 64 * 1024 * 1024;

// =============================================================================
// RECOMMENDATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    IncreaseL1Size,
    IncreaseMaxConnections,
    ReviewAcquireTimeouts,
    ImproveHitRate,
    EnableCompression,
    EnablePooling,
}

/// One piece of tuning advice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub severity: Severity,
    pub message: String,
}

impl Recommendation {
    fn new(kind: RecommendationKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// =============================================================================
// SAMPLING WINDOW
// =============================================================================

/// Pool and cache stats taken at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub taken_at: DateTime<Utc>,
    pub pool: PoolStats,
    pub cache: CacheStats,
}

impl Sample {
    pub fn new(pool: PoolStats, cache: CacheStats) -> Self {
        Self {
            taken_at: Utc::now(),
            pool,
            cache,
        }
    }
}

/// The most recent `capacity` samples, oldest first.
#[derive(Debug, Clone)]
pub struct StatsWindow {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl StatsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Whether `condition` held in every sample of a window of at least two.
    pub fn persistently(&self, condition: impl Fn(&Sample) -> bool) -> bool {
        self.samples.len() >= 2 && self.samples.iter().all(condition)
    }

    /// Derive recommendations from the samples in the window.
    pub fn recommendations(&self, compression_enabled: bool) -> Vec<Recommendation> {
        let Some(latest) = self.latest() else {
            return Vec::new();
        };
        let mut out = Vec::new();

        if !latest.pool.pooling_enabled {
            out.push(Recommendation::new(
                RecommendationKind::EnablePooling,
                Severity::Warning,
                "Connection pooling is disabled; every command opens a new connection. \
                 Enable pooling to cut connection churn",
            ));
        } else if self.persistently(|s| s.pool.waiter_count > 0) {
            out.push(Recommendation::new(
                RecommendationKind::IncreaseMaxConnections,
                Severity::Warning,
                format!(
                    "Callers are persistently queued for connections \
                     ({} waiting, max_connections = {}). Increase max_connections",
                    latest.pool.waiter_count, latest.pool.max_connections
                ),
            ));
        }

        let timeouts = match self.samples.front() {
            Some(first) if self.samples.len() > 1 => latest
                .pool
                .total_timeouts
                .saturating_sub(first.pool.total_timeouts),
            _ => latest.pool.total_timeouts,
        };
        if timeouts > 0 {
            out.push(Recommendation::new(
                RecommendationKind::ReviewAcquireTimeouts,
                Severity::Critical,
                format!(
                    "{timeouts} acquire calls timed out waiting for a connection. \
                     Increase max_connections or acquire_timeout"
                ),
            ));
        }

        if latest.cache.caching_enabled {
            if self.persistently(|s| s.cache.l1_utilization >= SATURATED_UTILIZATION)
                && latest.cache.l2_hit_share() >= HIGH_L2_HIT_SHARE
            {
                out.push(Recommendation::new(
                    RecommendationKind::IncreaseL1Size,
                    Severity::Warning,
                    format!(
                        "L1 is persistently saturated ({:.0}% of {}) and {:.0}% of hits \
                         are promoted from L2. Increase l1_size",
                        latest.cache.l1_utilization,
                        latest.cache.l1_capacity,
                        latest.cache.l2_hit_share() * 100.0
                    ),
                ));
            }

            if latest.cache.lookups() >= MIN_LOOKUPS_FOR_HIT_RATE
                && latest.cache.hit_rate() < LOW_HIT_RATE
            {
                out.push(Recommendation::new(
                    RecommendationKind::ImproveHitRate,
                    Severity::Info,
                    format!(
                        "Cache hit rate is {:.1}%. \
                         Review which commands are cacheable and their TTLs",
                        latest.cache.hit_rate() * 100.0
                    ),
                ));
            }

            if !compression_enabled && latest.cache.memory_usage >= COMPRESSION_MEMORY_BYTES {
                out.push(Recommendation::new(
                    RecommendationKind::EnableCompression,
                    Severity::Info,
                    format!(
                        "Cache holds {} MiB. Enable compression to reduce memory usage",
                        latest.cache.memory_usage / (1024 * 1024)
                    ),
                ));
            }
        }

        out
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// Facade-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Commands accepted by `execute`
    pub commands: u64,
    /// Reads answered from the cache
    pub cache_served: u64,
    /// Commands sent to the store
    pub dispatched: u64,
    /// Transparent retries after a connection fault
    pub retries: u64,
    /// Cache entries dropped because of writes
    pub invalidations: u64,
    /// Commands that failed with an error
    pub failures: u64,
}

/// Aggregated view of one facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub name: String,
    pub generated_at: DateTime<Utc>,
    pub pool: PoolStats,
    pub cache: CacheStats,
    pub relay: RelayStats,
    pub cache_hit_rate: f64,
    pub samples: usize,
    pub recommendations: Vec<Recommendation>,
}

impl PerformanceReport {
    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
