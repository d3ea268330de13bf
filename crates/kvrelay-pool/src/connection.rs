//! Leased connection handle.

use std::fmt;
use std::sync::Weak;
use std::time::{Duration, Instant};

use kvrelay_domain::ConnectionState;
use tracing::debug;
use uuid::Uuid;

use crate::pool::{PoolInner, Slot};
use crate::transport::Transport;

/// A connection checked out of a [`ConnectionPool`](crate::ConnectionPool).
///
/// Hand it back with `release` (or `release_dedicated` for subscriber
/// leases). A handle dropped without being released is discarded and its
/// slot freed, so a panicking caller cannot leak capacity.
pub struct PooledConnection<T: Transport> {
    id: Uuid,
    conn: Option<T::Connection>,
    state: ConnectionState,
    dedicated: bool,
    created_at: Instant,
    last_used: Instant,
    pool: Weak<PoolInner<T>>,
}

impl<T: Transport> PooledConnection<T> {
    pub(crate) fn lease(
        slot: Slot<T::Connection>,
        dedicated: bool,
        pool: Weak<PoolInner<T>>,
    ) -> Self {
        Self {
            id: slot.id,
            conn: Some(slot.conn),
            state: ConnectionState::Active,
            dedicated,
            created_at: slot.created_at,
            last_used: Instant::now(),
            pool,
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reserved for a single caller (e.g. a subscriber) until released.
    pub const fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Raw transport connection, unless the handle has been closed.
    pub fn connection_mut(&mut self) -> Option<&mut T::Connection> {
        if self.state.is_terminal() {
            return None;
        }
        self.conn.as_mut()
    }

    pub(crate) fn clear_dedicated(&mut self) {
        self.dedicated = false;
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// A fatal transport error happened on this connection.
    pub(crate) fn mark_broken(&mut self) {
        if self.state.transition(ConnectionState::Closed).is_err() {
            self.state = ConnectionState::Closed;
        }
    }

    pub(crate) fn begin_validation(&mut self) -> bool {
        self.state.transition(ConnectionState::Validating).is_ok()
    }

    pub(crate) fn finish_validation(&mut self, healthy: bool) {
        let next = if healthy {
            ConnectionState::Idle
        } else {
            ConnectionState::Closed
        };
        if self.state.transition(next).is_err() {
            self.state = ConnectionState::Closed;
        }
    }

    /// Detach the raw connection; the handle's `Drop` becomes a no-op.
    pub(crate) fn take_slot(&mut self) -> Option<Slot<T::Connection>> {
        self.conn.take().map(|conn| Slot {
            id: self.id,
            conn,
            created_at: self.created_at,
            last_used: self.last_used,
        })
    }
}

impl<T: Transport> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        if self.conn.take().is_none() {
            return;
        }
        debug!(connection_id = %self.id, "Connection dropped without release, discarding");
        if let Some(pool) = self.pool.upgrade() {
            pool.discard_abandoned(self.dedicated);
        }
    }
}

impl<T: Transport> fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("dedicated", &self.dedicated)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}
