//! # Tiered Cache
//!
//! Two in-process tiers in front of the remote store:
//!
//! ```text
//!   set ──▶ ┌──────────────┐  overflow (LRU)  ┌──────────────┐  overflow (LRU)
//!           │   L1 (hot)   │ ───────────────▶ │ L2 (overflow)│ ───────────────▶ evicted
//!   get ──▶ └──────────────┘ ◀─── promote ─── └──────────────┘
//! ```
//!
//! - Lookups check L1, then L2; an L2 hit is promoted back into L1.
//! - Expired entries read as absent and are purged on access (lazy expiry);
//!   a single background sweep bounds memory held by keys never read again.
//! - Every tier mutation happens under one lock, so callers never observe a
//!   half-inserted or half-evicted tier. Observers are notified after the
//!   lock is released but before the call returns.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, Tier, compress, decompress};
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, CacheObserver, ObserverId, ObserverList};
use crate::stats::CacheStats;
use crate::tier::CacheTier;

// =============================================================================
// TIER STATE
// =============================================================================

/// Both tiers plus cumulative counters, guarded by a single lock.
struct TierState {
    l1: CacheTier,
    l2: CacheTier,
    l1_hits: u64,
    l1_misses: u64,
    l2_hits: u64,
    l2_misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Raw payload copied out of a tier: bytes plus the compressed flag.
type Found = (Vec<u8>, bool);

impl TierState {
    fn new(config: &CacheConfig) -> Self {
        Self {
            l1: CacheTier::new(Tier::L1, config.l1_size),
            l2: CacheTier::new(Tier::L2, config.l2_size),
            l1_hits: 0,
            l1_misses: 0,
            l2_hits: 0,
            l2_misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn lookup(&mut self, key: &str, now: Instant, events: &mut Vec<CacheEvent>) -> Option<Found> {
        if self.l1.peek(key).is_some_and(|entry| entry.is_expired(now)) {
            self.l1.remove(key);
            self.expirations += 1;
        } else if let Some(entry) = self.l1.get(key) {
            let found = (entry.payload().to_vec(), entry.is_compressed());
            self.l1_hits += 1;
            events.push(CacheEvent::Hit {
                key: key.to_string(),
                tier: Tier::L1,
            });
            return Some(found);
        }
        self.l1_misses += 1;

        if self.l2.peek(key).is_some_and(|entry| entry.is_expired(now)) {
            self.l2.remove(key);
            self.expirations += 1;
        } else if let Some(entry) = self.l2.remove(key) {
            let found = (entry.payload().to_vec(), entry.is_compressed());
            self.l2_hits += 1;
            self.l1.insert(key.to_string(), entry);
            self.rebalance(now, events);
            events.push(CacheEvent::Hit {
                key: key.to_string(),
                tier: Tier::L2,
            });
            return Some(found);
        }
        self.l2_misses += 1;

        events.push(CacheEvent::Miss {
            key: key.to_string(),
        });
        None
    }

    fn insert(&mut self, key: &str, entry: CacheEntry, now: Instant, events: &mut Vec<CacheEvent>) {
        self.l2.remove(key);
        self.l1.insert(key.to_string(), entry);
        events.push(CacheEvent::Set {
            key: key.to_string(),
        });
        self.rebalance(now, events);
    }

    /// Push L1 overflow down into L2, oldest first.
    fn rebalance(&mut self, now: Instant, events: &mut Vec<CacheEvent>) {
        while let Some((key, entry)) = self.l1.pop_overflow() {
            self.demote(key, entry, now, events);
        }
    }

    fn demote(
        &mut self,
        key: String,
        entry: CacheEntry,
        now: Instant,
        events: &mut Vec<CacheEvent>,
    ) {
        if entry.is_expired(now) {
            self.expirations += 1;
            return;
        }
        if self.l2.capacity() == 0 {
            self.evict(key, Tier::L1, events);
            return;
        }
        if self.l2.is_full() {
            if let Some((oldest, _)) = self.l2.pop_lru() {
                self.evict(oldest, Tier::L2, events);
            }
        }
        trace!(key = %key, "Demoted entry to L2");
        self.l2.insert(key, entry);
    }

    fn evict(&mut self, key: String, tier: Tier, events: &mut Vec<CacheEvent>) {
        self.evictions += 1;
        trace!(key = %key, %tier, "Evicted entry");
        events.push(CacheEvent::Evict { key, tier });
    }

    fn remove(&mut self, key: &str) -> bool {
        let from_l1 = self.l1.remove(key).is_some();
        let from_l2 = self.l2.remove(key).is_some();
        from_l1 || from_l2
    }

    fn remove_prefix(&mut self, prefix: &str) -> usize {
        self.l1.drain_prefix(prefix).len() + self.l2.drain_prefix(prefix).len()
    }

    /// Live-entry check that never changes recency. Expired entries found on
    /// the way are purged, which leaves the order of the others untouched.
    fn contains_live(&mut self, key: &str, now: Instant) -> bool {
        match self.l1.peek(key).map(|entry| entry.is_expired(now)) {
            Some(false) => return true,
            Some(true) => {
                self.l1.remove(key);
                self.expirations += 1;
            }
            None => {}
        }
        match self.l2.peek(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                self.l2.remove(key);
                self.expirations += 1;
                false
            }
            None => false,
        }
    }

    fn tier_of(&self, key: &str, now: Instant) -> Option<Tier> {
        [&self.l1, &self.l2].into_iter().find_map(|tier| {
            tier.peek(key)
                .filter(|entry| !entry.is_expired(now))
                .map(CacheEntry::tier)
        })
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let removed = self.l1.drain_expired(now).len() + self.l2.drain_expired(now).len();
        self.expirations += removed as u64;
        removed
    }

    fn clear(&mut self) {
        self.l1.clear();
        self.l2.clear();
    }

    fn stats(&self, caching_enabled: bool) -> CacheStats {
        CacheStats {
            caching_enabled,
            l1_hits: self.l1_hits,
            l1_misses: self.l1_misses,
            l2_hits: self.l2_hits,
            l2_misses: self.l2_misses,
            evictions: self.evictions,
            expirations: self.expirations,
            memory_usage: self.l1.bytes() + self.l2.bytes(),
            l1_size: self.l1.len(),
            l2_size: self.l2.len(),
            l1_capacity: self.l1.capacity(),
            l2_capacity: self.l2.capacity(),
            l1_utilization: self.l1.utilization(),
            l2_utilization: self.l2.utilization(),
        }
    }
}

// =============================================================================
// TIERED CACHE
// =============================================================================

struct Shared {
    config: CacheConfig,
    state: Mutex<TierState>,
    observers: RwLock<ObserverList>,
}

impl Shared {
    fn emit(&self, events: &[CacheEvent]) {
        if events.is_empty() {
            return;
        }
        let observers = self.observers.read().snapshot();
        for event in events {
            for observer in &observers {
                observer.on_event(event);
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let removed = self.state.lock().purge_expired(Instant::now());
        if removed > 0 {
            debug!(removed, "Expiry sweep removed entries");
        }
        removed
    }
}

/// Two-tier, size- and TTL-bounded in-process cache.
///
/// Owned by exactly one facade. All methods take `&self`; mutations are
/// serialised by an internal lock scoped to this instance.
pub struct TieredCache {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TieredCache {
    /// Create a cache after validating `config`.
    ///
    /// The expiry sweep is not started here; call [`start_sweeper`](Self::start_sweeper)
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] for contradictory options.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let state = TierState::new(&config);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                observers: RwLock::new(ObserverList::default()),
            }),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.config.enable_caching
    }

    // =========================================================================
    // BYTE PAYLOADS
    // =========================================================================

    /// Look up `key`, checking L1 then L2. Expired entries read as absent.
    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            return None;
        }

        let mut events = Vec::with_capacity(2);
        let found = self
            .shared
            .state
            .lock()
            .lookup(key, Instant::now(), &mut events);
        self.shared.emit(&events);

        let (payload, compressed) = found?;
        debug!(key, "Cache hit");
        if !compressed {
            return Some(payload);
        }
        match decompress(&payload) {
            Ok(inflated) => Some(inflated),
            Err(err) => {
                warn!(key, error = %err, "Failed to inflate cached payload, dropping entry");
                self.shared.state.lock().remove(key);
                None
            }
        }
    }

    /// Store `value` as the most recently used L1 entry.
    ///
    /// `ttl` falls back to the configured default; with neither the entry
    /// never expires. Re-setting a key resets both its recency and expiry.
    pub fn set_bytes(&self, key: impl Into<String>, value: Vec<u8>, ttl: Option<Duration>) {
        if !self.is_enabled() {
            return;
        }

        let key = key.into();
        let now = Instant::now();
        let (payload, compressed) = self.pack(&key, value);
        let expires_at = ttl.or(self.shared.config.default_ttl).map(|ttl| now + ttl);
        let entry = CacheEntry::new(&key, payload, compressed, expires_at);

        let mut events = Vec::with_capacity(2);
        self.shared
            .state
            .lock()
            .insert(&key, entry, now, &mut events);
        self.shared.emit(&events);
    }

    fn pack(&self, key: &str, value: Vec<u8>) -> (Vec<u8>, bool) {
        let config = &self.shared.config;
        if !config.enable_compression || value.len() < config.compression_threshold {
            return (value, false);
        }
        match compress(&value) {
            Ok(packed) if packed.len() < value.len() => (packed, true),
            Ok(_) => (value, false),
            Err(err) => {
                warn!(key, error = %err, "Compression failed, storing payload uncompressed");
                (value, false)
            }
        }
    }

    // =========================================================================
    // TYPED PAYLOADS
    // =========================================================================

    /// Look up and deserialize a JSON payload.
    ///
    /// An entry that no longer deserializes as `T` is dropped and reads as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_bytes(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                let err = CacheError::Serialization {
                    key: key.to_string(),
                    message: err.to_string(),
                };
                warn!(error = %err, "Discarding undecodable cache entry");
                self.shared.state.lock().remove(key);
                None
            }
        }
    }

    /// Serialize `value` as JSON and store it.
    ///
    /// When serialization fails nothing is cached and any previous entry for
    /// `key` is dropped so it cannot be read stale.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) {
        let key = key.into();
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set_bytes(key, bytes, ttl),
            Err(err) => {
                let err = CacheError::Serialization {
                    key: key.clone(),
                    message: err.to_string(),
                };
                warn!(error = %err, "Value not cacheable, skipping");
                self.shared.state.lock().remove(&key);
            }
        }
    }

    // =========================================================================
    // INVALIDATION & INSPECTION
    // =========================================================================

    /// Remove `key` from both tiers. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.shared.state.lock().remove(key)
    }

    /// Remove every entry whose key starts with `prefix`, returning how many.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let removed = self.shared.state.lock().remove_prefix(prefix);
        if removed > 0 {
            debug!(prefix, removed, "Invalidated cache entries by prefix");
        }
        removed
    }

    /// Whether a live entry exists. Does not alter recency in either tier.
    pub fn has(&self, key: &str) -> bool {
        self.is_enabled() && self.shared.state.lock().contains_live(key, Instant::now())
    }

    /// Tier currently holding a live entry for `key`, without touching recency.
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        self.shared.state.lock().tier_of(key, Instant::now())
    }

    /// Empty both tiers. Cumulative hit/miss/eviction counters are kept.
    pub fn clear(&self) {
        self.shared.state.lock().clear();
        info!("Cache cleared");
    }

    /// Immutable snapshot of counters and occupancy.
    pub fn stats(&self) -> CacheStats {
        self.shared.state.lock().stats(self.is_enabled())
    }

    /// Remove every expired entry now, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    // =========================================================================
    // OBSERVERS
    // =========================================================================

    pub fn subscribe(&self, observer: Arc<dyn CacheObserver>) -> ObserverId {
        self.shared.observers.write().add(observer)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.observers.write().remove(id)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Spawn the periodic expiry sweep on the current Tokio runtime.
    ///
    /// Returns `false` when a sweep is already running or no runtime is
    /// available; in the latter case expiry stays lazy-only.
    pub fn start_sweeper(&self) -> bool {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime, expiry sweep disabled");
            return false;
        };

        let interval = self.shared.config.sweep_interval;
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        *slot = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.purge_expired();
            }
        }));
        debug!(interval_ms = interval.as_millis(), "Expiry sweep started");
        true
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the sweep, empty both tiers and detach every observer.
    pub fn destroy(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.shared.state.lock().clear();
        self.shared.observers.write().clear();
        info!("Cache destroyed");
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn cache(l1: usize, l2: usize) -> TieredCache {
        TieredCache::new(CacheConfig {
            l1_size: l1,
            l2_size: l2,
            ..Default::default()
        })
        .unwrap()
    }

    fn recorder(cache: &TieredCache) -> Arc<StdMutex<Vec<String>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.subscribe(Arc::new(move |event: &CacheEvent| {
            sink.lock()
                .unwrap()
                .push(format!("{}({})", event.name(), event.key()));
        }));
        seen
    }

    #[test]
    fn test_roundtrip_without_ttl() {
        let cache = cache(4, 4);
        cache.set_bytes("k", b"v".to_vec(), None);
        assert_eq!(cache.get_bytes("k"), Some(b"v".to_vec()));

        let stats = cache.stats();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l1_misses, 0);
    }

    #[test]
    fn test_miss_counts_both_tiers() {
        let cache = cache(2, 2);
        assert_eq!(cache.get_bytes("nope"), None);
        let stats = cache.stats();
        assert_eq!(stats.l1_misses, 1);
        assert_eq!(stats.l2_misses, 1);
    }

    #[test]
    fn test_lru_demotes_least_recent_to_l2() {
        let cache = cache(3, 3);
        for key in ["a", "b", "c"] {
            cache.set_bytes(key, key.as_bytes().to_vec(), None);
        }
        cache.get_bytes("a");
        cache.set_bytes("d", b"d".to_vec(), None);

        let stats = cache.stats();
        assert_eq!(stats.l1_size, 3);
        assert_eq!(cache.tier_of("b"), Some(Tier::L2));
        assert_eq!(cache.tier_of("a"), Some(Tier::L1));
        assert_eq!(cache.tier_of("c"), Some(Tier::L1));
        assert_eq!(cache.tier_of("d"), Some(Tier::L1));
    }

    #[test]
    fn test_l2_hit_promotes_and_demotes_l1_lru() {
        let cache = cache(2, 2);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.set_bytes("b", b"2".to_vec(), None);
        cache.set_bytes("c", b"3".to_vec(), None);
        assert_eq!(cache.tier_of("a"), Some(Tier::L2));

        assert_eq!(cache.get_bytes("a"), Some(b"1".to_vec()));
        assert_eq!(cache.tier_of("a"), Some(Tier::L1));
        assert_eq!(cache.tier_of("b"), Some(Tier::L2));

        let stats = cache.stats();
        assert_eq!(stats.l1_misses, 1);
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l1_size, 2);
        assert_eq!(stats.l2_size, 1);
    }

    #[test]
    fn test_full_l2_evicts_its_oldest() {
        let cache = cache(1, 1);
        let seen = recorder(&cache);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.set_bytes("b", b"2".to_vec(), None);
        cache.set_bytes("c", b"3".to_vec(), None);

        assert_eq!(cache.tier_of("a"), None);
        assert_eq!(cache.tier_of("b"), Some(Tier::L2));
        assert_eq!(cache.stats().evictions, 1);
        assert!(seen.lock().unwrap().contains(&"cache:evict(a)".to_string()));
    }

    #[test]
    fn test_zero_l2_drops_overflow() {
        let cache = cache(1, 0);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.set_bytes("b", b"2".to_vec(), None);
        assert_eq!(cache.tier_of("a"), None);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().l2_size, 0);
    }

    #[test]
    fn test_reset_moves_key_to_mru() {
        let cache = cache(2, 0);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.set_bytes("b", b"2".to_vec(), None);
        cache.set_bytes("a", b"3".to_vec(), None);
        cache.set_bytes("c", b"4".to_vec(), None);

        assert_eq!(cache.get_bytes("a"), Some(b"3".to_vec()));
        assert_eq!(cache.tier_of("b"), None);
    }

    #[test]
    fn test_reset_of_l2_key_leaves_single_copy() {
        let cache = cache(1, 2);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.set_bytes("b", b"2".to_vec(), None);
        assert_eq!(cache.tier_of("a"), Some(Tier::L2));

        cache.set_bytes("a", b"new".to_vec(), None);
        let stats = cache.stats();
        assert_eq!(stats.l1_size + stats.l2_size, 2);
        assert_eq!(cache.get_bytes("a"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_has_is_recency_neutral() {
        let cache = cache(2, 0);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.set_bytes("b", b"2".to_vec(), None);
        assert!(cache.has("a"));
        cache.set_bytes("c", b"3".to_vec(), None);

        assert!(!cache.has("a"));
        assert!(cache.has("b"));
        assert_eq!(cache.stats().l1_hits, 0);
    }

    #[test]
    fn test_has_honors_ttl() {
        let cache = cache(2, 2);
        cache.set_bytes("k", b"v".to_vec(), Some(Duration::from_millis(5)));
        assert!(cache.has("k"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(!cache.has("k"));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_delete_removes_from_either_tier() {
        let cache = cache(1, 2);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.set_bytes("b", b"2".to_vec(), None);

        assert!(cache.delete("a"));
        assert!(cache.delete("b"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.stats().memory_usage, 0);
    }

    #[test]
    fn test_delete_prefix_spans_tiers() {
        let cache = cache(1, 4);
        cache.set_bytes("user:1|GET", b"1".to_vec(), None);
        cache.set_bytes("user:1|HGETALL", b"2".to_vec(), None);
        cache.set_bytes("user:2|GET", b"3".to_vec(), None);

        assert_eq!(cache.delete_prefix("user:1|"), 2);
        assert!(cache.has("user:2|GET"));
    }

    #[test]
    fn test_clear_keeps_counters() {
        let cache = cache(2, 2);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.get_bytes("a");
        cache.get_bytes("zz");
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.l1_size, 0);
        assert_eq!(stats.l2_size, 0);
        assert_eq!(stats.memory_usage, 0);
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l2_misses, 1);

        cache.clear();
        assert_eq!(cache.stats(), stats);
    }

    #[test]
    fn test_memory_accounting_is_incremental() {
        let cache = cache(2, 2);
        cache.set_bytes("a", vec![0; 100], None);
        let one = cache.stats().memory_usage;
        assert!(one >= 101);

        cache.set_bytes("b", vec![0; 100], None);
        assert_eq!(cache.stats().memory_usage, one * 2);

        cache.delete("a");
        assert_eq!(cache.stats().memory_usage, one);
    }

    #[test]
    fn test_default_ttl_applies() {
        let cache = TieredCache::new(CacheConfig {
            default_ttl: Some(Duration::from_millis(5)),
            ..Default::default()
        })
        .unwrap();
        cache.set_bytes("k", b"v".to_vec(), None);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get_bytes("k"), None);
    }

    #[test]
    fn test_explicit_ttl_overrides_default() {
        let cache = TieredCache::new(CacheConfig {
            default_ttl: Some(Duration::from_millis(5)),
            ..Default::default()
        })
        .unwrap();
        cache.set_bytes("k", b"v".to_vec(), Some(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get_bytes("k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache(4, 4);
        cache.set_bytes("a", b"1".to_vec(), Some(Duration::from_millis(1)));
        cache.set_bytes("b", b"2".to_vec(), None);
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().l1_size, 1);
    }

    #[test]
    fn test_events_fire_in_call() {
        let cache = cache(1, 1);
        let seen = recorder(&cache);
        cache.set_bytes("a", b"1".to_vec(), None);
        cache.get_bytes("a");
        cache.get_bytes("x");

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["cache:set(a)", "cache:hit(a)", "cache:miss(x)"]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let cache = cache(1, 1);
        let seen = Arc::new(StdMutex::new(0_usize));
        let sink = Arc::clone(&seen);
        let id = cache.subscribe(Arc::new(move |_: &CacheEvent| {
            *sink.lock().unwrap() += 1;
        }));
        cache.set_bytes("a", b"1".to_vec(), None);
        assert!(cache.unsubscribe(id));
        cache.set_bytes("b", b"1".to_vec(), None);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_observer_may_reenter_cache() {
        let cache = Arc::new(cache(4, 4));
        let weak = Arc::downgrade(&cache);
        cache.subscribe(Arc::new(move |event: &CacheEvent| {
            if let (CacheEvent::Set { key }, Some(cache)) = (event, weak.upgrade()) {
                assert!(cache.has(key));
            }
        }));
        cache.set_bytes("a", b"1".to_vec(), None);
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Profile {
            name: String,
            tags: Vec<String>,
        }

        let cache = cache(2, 2);
        let profile = Profile {
            name: "ada".into(),
            tags: vec!["admin".into()],
        };
        cache.set("p", &profile, None);
        assert_eq!(cache.get::<Profile>("p"), Some(profile));
    }

    #[test]
    fn test_type_mismatch_reads_as_miss_and_drops_entry() {
        let cache = cache(2, 2);
        cache.set("n", &"not a number", None);
        assert_eq!(cache.get::<u64>("n"), None);
        assert!(!cache.has("n"));
    }

    #[test]
    fn test_compression_roundtrip() {
        let cache = TieredCache::new(CacheConfig {
            enable_compression: true,
            compression_threshold: 64,
            ..Default::default()
        })
        .unwrap();
        let value = "abcdefgh".repeat(1_000).into_bytes();
        cache.set_bytes("big", value.clone(), None);

        assert!(cache.stats().memory_usage < value.len());
        assert_eq!(cache.get_bytes("big"), Some(value));
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let cache = TieredCache::new(CacheConfig {
            enable_caching: false,
            ..Default::default()
        })
        .unwrap();
        cache.set_bytes("k", b"v".to_vec(), None);
        assert_eq!(cache.get_bytes("k"), None);
        assert!(!cache.has("k"));

        let stats = cache.stats();
        assert!(!stats.caching_enabled);
        assert_eq!(stats.lookups(), 0);
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let err = TieredCache::new(CacheConfig {
            l1_size: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn test_sweeper_needs_runtime() {
        let cache = cache(2, 2);
        assert!(!cache.start_sweeper());
        assert!(!cache.is_sweeping());
    }

    #[tokio::test]
    async fn test_sweeper_purges_unread_keys() {
        let cache = TieredCache::new(CacheConfig {
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        })
        .unwrap();
        assert!(cache.start_sweeper());
        assert!(!cache.start_sweeper());

        cache.set_bytes("k", b"v".to_vec(), Some(Duration::from_millis(5)));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let stats = cache.stats();
        assert_eq!(stats.l1_size, 0);
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test]
    async fn test_destroy_stops_sweeper_and_detaches() {
        let cache = cache(2, 2);
        let seen = recorder(&cache);
        assert!(cache.start_sweeper());
        cache.set_bytes("a", b"1".to_vec(), None);

        cache.destroy();
        tokio::task::yield_now().await;
        assert!(!cache.is_sweeping());
        assert_eq!(cache.stats().l1_size, 0);

        cache.set_bytes("b", b"2".to_vec(), None);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
