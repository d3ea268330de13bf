//! # Relay Configuration
//!
//! One explicit structure per facade, validated once at construction.
//! [`RelayConfig::from_env`] reads every option from `KVRELAY_*` variables
//! and falls back to the default for anything unset or unparsable.

use std::env;
use std::time::Duration;

use kvrelay_cache::CacheConfig;
use kvrelay_pool::PoolConfig;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::policy::CommandPolicy;

/// Facade configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Facade name; also names its connection pool
    pub name: String,

    /// Connection pool options
    pub pool: PoolConfig,

    /// Tiered cache options
    pub cache: CacheConfig,

    /// Which commands are cached, and for how long
    pub policy: CommandPolicy,

    /// Stats samples kept for recommendations
    pub report_window: usize,

    /// Logging level used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            policy: CommandPolicy::default(),
            report_window: 5,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Default configuration under another name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |key: &str, default: bool| {
            lookup(key).map_or(default, |v| v == "true" || v == "1")
        };
        let millis = |key: &str, default: Duration| {
            parsed(key).map_or(default, Duration::from_millis)
        };
        let count = |key: &str, default: usize| {
            parsed(key)
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(default)
        };

        let name = lookup("KVRELAY_NAME").unwrap_or(defaults.name);

        let pool = PoolConfig {
            name: name.clone(),
            enable_pooling: flag("KVRELAY_ENABLE_POOLING", defaults.pool.enable_pooling),
            max_connections: count("KVRELAY_MAX_CONNECTIONS", defaults.pool.max_connections),
            min_connections: count("KVRELAY_MIN_CONNECTIONS", defaults.pool.min_connections),
            acquire_timeout: millis("KVRELAY_ACQUIRE_TIMEOUT_MS", defaults.pool.acquire_timeout),
            idle_timeout: millis("KVRELAY_IDLE_TIMEOUT_MS", defaults.pool.idle_timeout),
            shutdown_grace: millis("KVRELAY_SHUTDOWN_GRACE_MS", defaults.pool.shutdown_grace),
            validate_on_acquire: flag(
                "KVRELAY_VALIDATE_ON_ACQUIRE",
                defaults.pool.validate_on_acquire,
            ),
        };

        let cache = CacheConfig {
            enable_caching: flag("KVRELAY_ENABLE_CACHING", defaults.cache.enable_caching),
            l1_size: count("KVRELAY_L1_SIZE", defaults.cache.l1_size),
            l2_size: count("KVRELAY_L2_SIZE", defaults.cache.l2_size),
            default_ttl: parsed("KVRELAY_DEFAULT_TTL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .or(defaults.cache.default_ttl),
            enable_compression: flag(
                "KVRELAY_ENABLE_COMPRESSION",
                defaults.cache.enable_compression,
            ),
            compression_threshold: count(
                "KVRELAY_COMPRESSION_THRESHOLD",
                defaults.cache.compression_threshold,
            ),
            sweep_interval: millis("KVRELAY_SWEEP_INTERVAL_MS", defaults.cache.sweep_interval),
        };

        let mut policy = defaults.policy;
        if let Some(pairs) = lookup("KVRELAY_CACHE_TTLS") {
            policy.ttls.extend(CommandPolicy::parse_ttls(&pairs));
        }

        Self {
            name,
            pool,
            cache,
            policy,
            report_window: count("KVRELAY_REPORT_WINDOW", defaults.report_window),
            log_level: lookup("KVRELAY_LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Reject contradictory options.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] naming the offending option.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelayError::Configuration("name must not be empty".to_string()));
        }
        if self.report_window < 2 {
            return Err(RelayError::Configuration(format!(
                "report_window must be at least 2, got {}",
                self.report_window
            )));
        }
        self.pool
            .validate()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;
        self.cache
            .validate()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;
        self.policy.validate().map_err(RelayError::Configuration)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.report_window, 5);
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.cache.l1_size, 1_000);
    }

    #[test]
    fn test_from_lookup_reads_every_section() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("KVRELAY_NAME", "node-a"),
            ("KVRELAY_MAX_CONNECTIONS", "4"),
            ("KVRELAY_MIN_CONNECTIONS", "2"),
            ("KVRELAY_ACQUIRE_TIMEOUT_MS", "250"),
            ("KVRELAY_ENABLE_POOLING", "false"),
            ("KVRELAY_L1_SIZE", "64"),
            ("KVRELAY_DEFAULT_TTL_MS", "100"),
            ("KVRELAY_ENABLE_COMPRESSION", "1"),
            ("KVRELAY_CACHE_TTLS", "GET=30000"),
            ("KVRELAY_REPORT_WINDOW", "3"),
        ]));

        assert_eq!(config.name, "node-a");
        assert_eq!(config.pool.name, "node-a");
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.pool.min_connections, 2);
        assert_eq!(config.pool.acquire_timeout, Duration::from_millis(250));
        assert!(!config.pool.enable_pooling);
        assert_eq!(config.cache.l1_size, 64);
        assert_eq!(config.cache.default_ttl, Some(Duration::from_millis(100)));
        assert!(config.cache.enable_compression);
        assert_eq!(config.policy.ttl_for("GET"), Some(Duration::from_secs(30)));
        assert_eq!(config.report_window, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unparsable_values_fall_back_to_defaults() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("KVRELAY_MAX_CONNECTIONS", "lots"),
            ("KVRELAY_DEFAULT_TTL_MS", "-5"),
        ]));
        assert_eq!(config.pool.max_connections, 10);
        assert_eq!(config.cache.default_ttl, None);
    }

    #[test]
    fn test_contradictions_fail_fast() {
        let mut config = RelayConfig::named("node-b");
        config.pool.min_connections = 20;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            RelayError::Configuration(ref msg) if msg.contains("min_connections")
        ));

        let mut config = RelayConfig::default();
        config.report_window = 1;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.cache.l1_size = 0;
        assert!(config.validate().is_err());
    }
}
