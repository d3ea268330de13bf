//! # Pool Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name, reported in errors and logs
    pub name: String,

    /// When off, every acquire opens a fresh connection and release closes it
    pub enable_pooling: bool,

    /// Hard upper bound on open connections
    pub max_connections: usize,

    /// Connections created on warm-up and kept best-effort afterwards
    pub min_connections: usize,

    /// How long `acquire` may wait for a free connection
    pub acquire_timeout: Duration,

    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Duration,

    /// How long `shutdown` waits for leased connections to come back
    pub shutdown_grace: Duration,

    /// Probe idle connections before handing them out
    pub validate_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            enable_pooling: true,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(5),
            validate_on_acquire: false,
        }
    }
}

impl PoolConfig {
    /// Check option combinations that cannot work together.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than 0".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "idle_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = PoolConfig {
            max_connections: 2,
            min_connections: 3,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_connections (3)"));
    }

    #[test]
    fn test_zero_max_rejected() {
        let config = PoolConfig {
            max_connections: 0,
            min_connections: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::Configuration(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = PoolConfig {
            acquire_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
