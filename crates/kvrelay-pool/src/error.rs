//! Pool and transport error types

use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a transport while connecting or executing.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),
}

impl TransportError {
    /// Whether the connection that produced this error can no longer be used.
    pub const fn is_connection_fault(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Io(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for TransportError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() {
            Self::Connect(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            Self::Io(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

/// Errors visible to callers of the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connection pool '{pool}' exhausted after waiting {waited_ms}ms")]
    Exhausted { pool: String, waited_ms: u64 },

    #[error("Connection pool '{pool}' is closed")]
    Closed { pool: String },

    #[error("Connection {connection_id} in pool '{pool}' failed its health check")]
    ConnectionUnhealthy { pool: String, connection_id: Uuid },

    #[error("Transport error in pool '{pool}': {source}")]
    Transport {
        pool: String,
        #[source]
        source: TransportError,
    },

    #[error("Invalid pool configuration: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Transport failure that invalidated the connection it happened on.
    pub const fn is_connection_fault(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_connection_fault(),
            Self::ConnectionUnhealthy { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
