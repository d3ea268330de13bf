//! # Cache Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Tiered cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every lookup misses and every insert is skipped
    pub enable_caching: bool,

    /// Maximum number of entries in the hot tier
    pub l1_size: usize,

    /// Maximum number of entries in the overflow tier (0 disables it)
    pub l2_size: usize,

    /// TTL applied when `set` is called without one; `None` means no expiry
    pub default_ttl: Option<Duration>,

    /// Gzip payloads at or above `compression_threshold` bytes
    pub enable_compression: bool,

    /// Minimum payload size considered for compression
    pub compression_threshold: usize,

    /// Period of the background expiry sweep
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            l1_size: 1_000,
            l2_size: 10_000,
            default_ttl: None,
            enable_compression: false,
            compression_threshold: 1_024,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// Check option combinations that cannot work together.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.enable_caching && self.l1_size == 0 {
            return Err(CacheError::Configuration(
                "l1_size must be greater than 0 when caching is enabled".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::Configuration(
                "sweep_interval must be greater than 0".to_string(),
            ));
        }
        if self.default_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::Configuration(
                "default_ttl must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}
