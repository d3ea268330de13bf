//! # kvrelay Pool
//!
//! Client-side connection pool for a remote key-value store.
//!
//! The pool bounds the number of open connections, serves waiters in strict
//! arrival order, probes connections when they come back, and keeps a small
//! warm minimum. The wire protocol lives behind the [`Transport`] trait:
//! [`RedisTransport`] for real servers (feature `redis`, on by default) and
//! [`MemoryTransport`] for tests and local runs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvrelay_pool::{ConnectionPool, PoolConfig, RedisTransport};
//!
//! let pool = ConnectionPool::new(PoolConfig::default(), RedisTransport::new(url)?)?;
//! let mut conn = pool.acquire().await?;
//! let reply = pool.execute(&mut conn, &Command::new("GET").arg("user:1")).await;
//! pool.release(conn).await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod pool;
#[cfg(feature = "redis")]
pub mod redis_transport;
pub mod stats;
pub mod transport;

pub use config::PoolConfig;
pub use connection::PooledConnection;
pub use error::{PoolError, Result, TransportError};
pub use memory::{MemoryConnection, MemoryTransport};
pub use pool::ConnectionPool;
#[cfg(feature = "redis")]
pub use redis_transport::RedisTransport;
pub use stats::PoolStats;
pub use transport::Transport;
