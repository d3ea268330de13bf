//! # Resource Facade
//!
//! Owns one connection pool and one tiered cache for a single store node.
//!
//! - Cacheable reads are answered from the cache; a miss goes through the
//!   pool and the reply is cached (error replies never are).
//! - Writes go through the pool, then every cached reply derived from the
//!   keys they touch is dropped before the call returns. A read whose
//!   dispatch overlapped an invalidation does not fill the cache.
//! - A connection fault is retried once on a validated connection.
//!
//! Cache faults never surface here: they read as misses. Only pool errors
//! reach callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use kvrelay_cache::{CacheObserver, CacheStats, ObserverId, TieredCache};
use kvrelay_domain::{Command, Reply};
use kvrelay_pool::{
    ConnectionPool, PoolConfig, PoolError, PoolStats, PooledConnection, Transport,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::policy::{CommandClass, key_prefix};
use crate::report::{PerformanceReport, Recommendation, RelayStats, Sample, StatsWindow};

#[derive(Debug, Default)]
struct Counters {
    commands: AtomicU64,
    cache_served: AtomicU64,
    dispatched: AtomicU64,
    retries: AtomicU64,
    invalidations: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RelayStats {
        RelayStats {
            commands: self.commands.load(Ordering::Relaxed),
            cache_served: self.cache_served.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Pool + cache pair for one store node.
pub struct ResourceFacade<T: Transport> {
    config: RelayConfig,
    pool: ConnectionPool<T>,
    cache: TieredCache,
    window: Mutex<StatsWindow>,
    counters: Counters,
    /// Bumped by every invalidation; cache fills check it under the lock
    epoch: Mutex<u64>,
}

impl<T: Transport> ResourceFacade<T> {
    /// Build the facade. Nothing is connected until [`start`](Self::start)
    /// or the first command.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is contradictory.
    pub fn new(config: RelayConfig, transport: T) -> Result<Self> {
        config.validate()?;

        let pool = ConnectionPool::new(
            PoolConfig {
                name: config.name.clone(),
                ..config.pool.clone()
            },
            transport,
        )?;
        let cache = TieredCache::new(config.cache.clone())?;

        info!(
            relay = %config.name,
            caching = config.cache.enable_caching,
            pooling = config.pool.enable_pooling,
            "Resource facade created"
        );
        Ok(Self {
            window: Mutex::new(StatsWindow::new(config.report_window)),
            config,
            pool,
            cache,
            counters: Counters::default(),
            epoch: Mutex::new(0),
        })
    }

    /// Start the cache sweep and warm the pool. Returns the number of
    /// connections opened.
    pub async fn start(&self) -> usize {
        self.cache.start_sweeper();
        self.pool.warm_up().await
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub const fn pool(&self) -> &ConnectionPool<T> {
        &self.pool
    }

    pub const fn cache(&self) -> &TieredCache {
        &self.cache
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Execute one command through the cache and pool.
    ///
    /// # Errors
    ///
    /// Pool errors (exhausted, closed, transport failure after one retry).
    /// Server error replies are returned as `Ok(Reply::Error(..))`.
    pub async fn execute(&self, command: &Command) -> Result<Reply> {
        Counters::bump(&self.counters.commands, 1);

        let result = match self.config.policy.classify(command) {
            CommandClass::Cacheable { cache_key } => {
                self.read_through(command, &cache_key).await
            }
            CommandClass::Passthrough => self.dispatch(command).await,
            CommandClass::Write { keys } => {
                let result = self.dispatch(command).await;
                self.invalidate(&keys);
                result
            }
            CommandClass::WriteUnscoped => {
                let result = self.dispatch(command).await;
                self.drop_all_replies();
                debug!(
                    relay = %self.name(),
                    command = command.name(),
                    "Write touched undeclared keys, cache cleared"
                );
                result
            }
            CommandClass::Flush => {
                let result = self.dispatch(command).await;
                self.drop_all_replies();
                info!(
                    relay = %self.name(),
                    command = command.name(),
                    "Store flushed, cache cleared"
                );
                result
            }
        };

        if result.is_err() {
            Counters::bump(&self.counters.failures, 1);
        }
        result.map_err(Into::into)
    }

    async fn read_through(
        &self,
        command: &Command,
        cache_key: &str,
    ) -> std::result::Result<Reply, PoolError> {
        if let Some(reply) = self.cache.get::<Reply>(cache_key) {
            debug!(relay = %self.name(), key = %cache_key, "Cache hit");
            Counters::bump(&self.counters.cache_served, 1);
            return Ok(reply);
        }
        debug!(relay = %self.name(), key = %cache_key, "Cache miss, dispatching to pool");

        let started_at = *self.epoch.lock();
        let reply = self.dispatch(command).await?;
        if reply.is_error() {
            debug!(relay = %self.name(), key = %cache_key, "Error reply not cached");
            return Ok(reply);
        }

        let epoch = self.epoch.lock();
        if *epoch == started_at {
            let ttl = self.config.policy.ttl_for(command.name());
            self.cache.set(cache_key, &reply, ttl);
        } else {
            debug!(
                relay = %self.name(),
                key = %cache_key,
                "Invalidated during dispatch, reply not cached"
            );
        }
        Ok(reply)
    }

    fn invalidate(&self, keys: &[String]) {
        let mut epoch = self.epoch.lock();
        *epoch = epoch.wrapping_add(1);
        let removed: usize = keys
            .iter()
            .map(|key| self.cache.delete_prefix(&key_prefix(key)))
            .sum();
        drop(epoch);

        if removed > 0 {
            debug!(relay = %self.name(), keys = ?keys, removed, "Invalidated cached replies");
            Counters::bump(&self.counters.invalidations, removed as u64);
        }
    }

    fn drop_all_replies(&self) {
        let mut epoch = self.epoch.lock();
        *epoch = epoch.wrapping_add(1);
        self.cache.clear();
    }

    async fn dispatch(&self, command: &Command) -> std::result::Result<Reply, PoolError> {
        Counters::bump(&self.counters.dispatched, 1);
        match self.run_once(command, false).await {
            Err(err) if err.is_connection_fault() => {
                Counters::bump(&self.counters.retries, 1);
                warn!(
                    relay = %self.name(),
                    command = command.name(),
                    error = %err,
                    "Connection fault, retrying on a fresh connection"
                );
                self.run_once(command, true).await.inspect_err(|err| {
                    error!(
                        relay = %self.name(),
                        command = command.name(),
                        error = %err,
                        "Command failed after retry"
                    );
                })
            }
            other => other,
        }
    }

    async fn run_once(
        &self,
        command: &Command,
        validated: bool,
    ) -> std::result::Result<Reply, PoolError> {
        let mut conn = if validated {
            self.pool.acquire_validated().await?
        } else {
            self.pool.acquire().await?
        };
        let result = self.pool.execute(&mut conn, command).await;
        self.pool.release(conn).await;
        result
    }

    // =========================================================================
    // SUBSCRIBER CONNECTIONS
    // =========================================================================

    /// Lease a connection for a subscriber; it is never recycled while subscribed.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionPool::acquire`].
    pub async fn acquire_subscriber(&self) -> Result<PooledConnection<T>> {
        Ok(self.pool.acquire_dedicated().await?)
    }

    pub async fn release_subscriber(&self, conn: PooledConnection<T>, unsubscribed: bool) {
        self.pool.release_dedicated(conn, unsubscribed).await;
    }

    // =========================================================================
    // CACHE CONTROL
    // =========================================================================

    /// Empty the cache. The pool is untouched.
    pub fn clear_cache(&self) {
        self.drop_all_replies();
        info!(relay = %self.name(), "Cache cleared");
    }

    pub fn subscribe_cache_events(&self, observer: Arc<dyn CacheObserver>) -> ObserverId {
        self.cache.subscribe(observer)
    }

    pub fn unsubscribe_cache_events(&self, id: ObserverId) -> bool {
        self.cache.unsubscribe(id)
    }

    // =========================================================================
    // QUERY SURFACE
    // =========================================================================

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.counters.snapshot()
    }

    /// Record a stats sample and return the current recommendations.
    pub fn get_optimization_recommendations(&self) -> Vec<Recommendation> {
        let mut window = self.window.lock();
        window.record(Sample::new(self.pool.stats(), self.cache.stats()));
        window.recommendations(self.config.cache.enable_compression)
    }

    /// Record a stats sample and build a full report.
    pub fn get_performance_report(&self) -> PerformanceReport {
        let pool = self.pool.stats();
        let cache = self.cache.stats();

        let mut window = self.window.lock();
        window.record(Sample::new(pool.clone(), cache.clone()));
        let recommendations = window.recommendations(self.config.cache.enable_compression);
        let samples = window.len();
        drop(window);

        PerformanceReport {
            name: self.config.name.clone(),
            generated_at: Utc::now(),
            cache_hit_rate: cache.hit_rate(),
            pool,
            cache,
            relay: self.counters.snapshot(),
            samples,
            recommendations,
        }
    }

    /// Shut the pool down and destroy the cache.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.cache.destroy();
        info!(relay = %self.name(), "Resource facade shut down");
    }
}
