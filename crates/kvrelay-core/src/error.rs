//! # Relay Error Types
//!
//! Errors surfaced by the facade and registry. Cache faults never reach
//! command callers; only construction can fail with a cache error.

use kvrelay_cache::CacheError;
use kvrelay_pool::PoolError;
use thiserror::Error;

/// Relay-level errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("No resource registered under '{0}'")]
    UnknownResource(String),

    #[error("Resource '{0}' is already registered")]
    DuplicateResource(String),
}

impl RelayError {
    /// Stable code for logs and reports.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Pool(PoolError::Exhausted { .. }) => "POOL_EXHAUSTED",
            Self::Pool(PoolError::Closed { .. }) => "POOL_CLOSED",
            Self::Pool(PoolError::ConnectionUnhealthy { .. }) => "CONNECTION_UNHEALTHY",
            Self::Pool(PoolError::Transport { .. }) => "TRANSPORT_ERROR",
            Self::Pool(PoolError::Configuration(_))
            | Self::Cache(_)
            | Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnknownResource(_) => "UNKNOWN_RESOURCE",
            Self::DuplicateResource(_) => "DUPLICATE_RESOURCE",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
