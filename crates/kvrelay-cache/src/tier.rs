//! # Cache Tier
//!
//! One bounded key → entry map with strict least-recently-used ordering.
//! The tier does not enforce its own capacity on insert: the owning
//! [`TieredCache`](crate::TieredCache) decides where overflow goes (demotion
//! to L2 or eviction) and drains it with [`CacheTier::pop_overflow`].

use std::time::Instant;

use lru::LruCache;

use crate::entry::{CacheEntry, Tier};

/// Bounded LRU map holding entries for one tier.
pub struct CacheTier {
    level: Tier,
    capacity: usize,
    entries: LruCache<String, CacheEntry>,
    /// Running byte total, maintained on every insert and removal.
    bytes: usize,
}

impl CacheTier {
    pub fn new(level: Tier, capacity: usize) -> Self {
        Self {
            level,
            capacity,
            entries: LruCache::unbounded(),
            bytes: 0,
        }
    }

    pub const fn level(&self) -> Tier {
        self.level
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Occupancy as a percentage of capacity. A zero-capacity tier reports 0.
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.entries.len() as f64 / self.capacity as f64 * 100.0
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Insert as most recently used, returning the entry it replaced.
    pub fn insert(&mut self, key: String, mut entry: CacheEntry) -> Option<CacheEntry> {
        entry.set_tier(self.level);
        self.bytes += entry.size();
        let replaced = self.entries.put(key, entry);
        if let Some(old) = &replaced {
            self.bytes = self.bytes.saturating_sub(old.size());
        }
        replaced
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.pop(key)?;
        self.bytes = self.bytes.saturating_sub(removed.size());
        Some(removed)
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(String, CacheEntry)> {
        let (key, entry) = self.entries.pop_lru()?;
        self.bytes = self.bytes.saturating_sub(entry.size());
        Some((key, entry))
    }

    /// Pop the LRU entry only while the tier is over capacity.
    pub fn pop_overflow(&mut self) -> Option<(String, CacheEntry)> {
        if self.entries.len() > self.capacity {
            self.pop_lru()
        } else {
            None
        }
    }

    /// Remove every entry expired at `now`, leaving the order of the rest intact.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<(String, CacheEntry)> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        self.remove_all(expired)
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn drain_prefix(&mut self, prefix: &str) -> Vec<(String, CacheEntry)> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        self.remove_all(matching)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    /// Keys from least to most recently used.
    pub fn keys_lru_first(&self) -> Vec<String> {
        self.entries.iter().rev().map(|(key, _)| key.clone()).collect()
    }

    fn remove_all(&mut self, keys: Vec<String>) -> Vec<(String, CacheEntry)> {
        keys.into_iter()
            .filter_map(|key| self.remove(&key).map(|entry| (key, entry)))
            .collect()
    }
}

impl std::fmt::Debug for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTier")
            .field("level", &self.level)
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}
