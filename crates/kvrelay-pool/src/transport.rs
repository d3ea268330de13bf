//! # Transport Abstraction
//!
//! The pool never speaks a wire protocol itself. A [`Transport`] knows how to
//! open a connection to the remote store, run one command on it, probe it
//! and close it; the pool decides when each of those happens.

use async_trait::async_trait;
use kvrelay_domain::{Command, Reply};

use crate::error::TransportError;

/// Connection factory and command executor for one remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// One live session with the remote store.
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, TransportError>;

    /// Run a single command and return the server's reply.
    ///
    /// Server-side errors (wrong type, unknown command) come back as
    /// [`Reply::Error`]; `Err` is reserved for failures of the connection
    /// or the protocol.
    async fn execute(
        &self,
        conn: &mut Self::Connection,
        command: &Command,
    ) -> Result<Reply, TransportError>;

    /// Cheap liveness probe used when a connection is returned to the pool.
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    /// Close a connection the pool is done with.
    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }

    /// Human-readable endpoint for logs. Must not include credentials.
    fn endpoint(&self) -> String {
        "unknown".to_string()
    }
}
