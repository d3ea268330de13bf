//! # Connection Pool
//!
//! Bounded pool of transport connections with FIFO-fair waiting.
//!
//! ## Accounting
//!
//! `active` counts every slot owned by a caller: leased connections and
//! connections still being opened. `active + idle` never exceeds
//! `max_connections`. A slot changes hands only under the state lock, either
//! as a ready connection or as a reservation that lets the oldest waiter
//! open a connection of its own.
//!
//! ## Lifecycle
//!
//! ```text
//! acquire ─▶ idle (MRU) ─┬─▶ lease
//!            │           └─ stale / failed probe ─▶ close
//!            ├─▶ free slot ─▶ connect ─▶ lease
//!            └─▶ queue (FIFO) ─▶ grant | timeout
//!
//! release ─▶ probe ─┬─ healthy ─▶ oldest waiter | idle
//!                   └─ broken  ─▶ close ─▶ slot to oldest waiter | refill min
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use kvrelay_domain::{Command, Reply};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::error::{PoolError, Result};
use crate::stats::PoolStats;
use crate::transport::Transport;

// =============================================================================
// SLOTS AND GRANTS
// =============================================================================

pub(crate) struct Slot<C> {
    pub(crate) id: Uuid,
    pub(crate) conn: C,
    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,
}

impl<C> Slot<C> {
    fn open(conn: C) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            conn,
            created_at: now,
            last_used: now,
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }
}

/// What a queued caller receives when its turn comes.
enum Grant<C> {
    Ready(Slot<C>),
    /// A slot was freed; the waiter may open a connection in it.
    Reserved,
    Closed,
}

struct Waiter<C> {
    id: u64,
    tx: oneshot::Sender<Grant<C>>,
}

enum Step<C> {
    Reuse(Slot<C>),
    Create,
    Wait(u64, oneshot::Receiver<Grant<C>>),
    Closed,
}

// =============================================================================
// STATE
// =============================================================================

struct PoolState<C> {
    idle: VecDeque<Slot<C>>,
    active: usize,
    waiters: VecDeque<Waiter<C>>,
    next_waiter_id: u64,
    closed: bool,
    total_created: u64,
    total_destroyed: u64,
    total_waits: u64,
    total_timeouts: u64,
}

impl<C> PoolState<C> {
    const fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: 0,
            waiters: VecDeque::new(),
            next_waiter_id: 0,
            closed: false,
            total_created: 0,
            total_destroyed: 0,
            total_waits: 0,
            total_timeouts: 0,
        }
    }

    fn total(&self) -> usize {
        self.active + self.idle.len()
    }

    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.tx.is_closed()).count()
    }

    /// Give a healthy connection to the oldest waiter, or park it idle.
    ///
    /// Returns the connection when the pool is closed and it must be shut.
    fn offer_slot(&mut self, mut slot: Slot<C>) -> Option<Slot<C>> {
        if self.closed {
            self.active = self.active.saturating_sub(1);
            self.total_destroyed += 1;
            return Some(slot);
        }
        while let Some(waiter) = self.waiters.pop_front() {
            // A send only fails when that waiter already gave up.
            let Err(Grant::Ready(returned)) = waiter.tx.send(Grant::Ready(slot)) else {
                return None;
            };
            slot = returned;
        }
        slot.last_used = Instant::now();
        self.idle.push_back(slot);
        self.active = self.active.saturating_sub(1);
        None
    }

    /// Give up one slot; the oldest waiter inherits it as a reservation.
    fn free_slot(&mut self) {
        if !self.closed {
            while let Some(waiter) = self.waiters.pop_front() {
                if waiter.tx.send(Grant::Reserved).is_ok() {
                    return;
                }
            }
        }
        self.active = self.active.saturating_sub(1);
    }

    fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Put back a grant whose recipient no longer wants it.
    fn return_grant(&mut self, grant: Grant<C>) -> Option<Slot<C>> {
        match grant {
            Grant::Ready(slot) => self.offer_slot(slot),
            Grant::Reserved => {
                self.free_slot();
                None
            }
            Grant::Closed => None,
        }
    }
}

// =============================================================================
// SHARED INNER
// =============================================================================

pub(crate) struct PoolInner<T: Transport> {
    config: PoolConfig,
    transport: T,
    state: Mutex<PoolState<T::Connection>>,
    released: Notify,
    warmed: AtomicBool,
    dedicated: AtomicUsize,
}

impl<T: Transport> PoolInner<T> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn closed_error(&self) -> PoolError {
        PoolError::Closed {
            pool: self.config.name.clone(),
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Reserve slots up to `min_connections`, returning how many were taken.
    fn reserve_deficit(&self) -> usize {
        if !self.config.enable_pooling {
            return 0;
        }
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }
        let total = state.total();
        let wanted = self
            .config
            .min_connections
            .saturating_sub(total)
            .min(self.config.max_connections.saturating_sub(total));
        state.active += wanted;
        wanted
    }

    /// Open a connection in a slot the caller already holds.
    ///
    /// The slot is freed again if connecting fails or the future is dropped.
    async fn connect_reserved(&self) -> Result<Slot<T::Connection>> {
        let reservation = Reservation::hold(self);
        let conn = self
            .transport
            .connect()
            .await
            .map_err(|source| PoolError::Transport {
                pool: self.config.name.clone(),
                source,
            })?;
        reservation.keep();

        let slot = Slot::open(conn);
        self.state.lock().total_created += 1;
        debug!(pool = %self.name(), connection_id = %slot.id, "Opened connection");
        Ok(slot)
    }

    async fn fill_reserved(&self) -> bool {
        match self.connect_reserved().await {
            Ok(slot) => {
                if let Some(leftover) = self.recycle(slot) {
                    self.transport.close(leftover.conn).await;
                }
                true
            }
            Err(err) => {
                warn!(
                    pool = %self.name(),
                    error = %err,
                    "Failed to open connection toward minimum"
                );
                false
            }
        }
    }

    /// Return a healthy connection. Hands back the connection if it must be
    /// closed instead (pool closed or pooling disabled).
    fn recycle(&self, slot: Slot<T::Connection>) -> Option<Slot<T::Connection>> {
        let leftover = {
            let mut state = self.state.lock();
            if self.config.enable_pooling {
                state.offer_slot(slot)
            } else {
                state.active = state.active.saturating_sub(1);
                state.total_destroyed += 1;
                Some(slot)
            }
        };
        self.released.notify_waiters();
        leftover
    }

    /// Close a connection and give up its slot.
    async fn destroy(self: &Arc<Self>, slot: Slot<T::Connection>) {
        {
            let mut state = self.state.lock();
            state.total_destroyed += 1;
            state.free_slot();
        }
        self.released.notify_waiters();
        debug!(pool = %self.name(), connection_id = %slot.id, "Closing connection");
        self.transport.close(slot.conn).await;
        self.replenish();
    }

    /// Close a connection but keep its slot for a replacement.
    async fn retire(&self, slot: Slot<T::Connection>) {
        self.state.lock().total_destroyed += 1;
        self.transport.close(slot.conn).await;
    }

    pub(crate) fn discard_abandoned(self: &Arc<Self>, dedicated: bool) {
        if dedicated {
            self.dedicated.fetch_sub(1, Ordering::AcqRel);
        }
        {
            let mut state = self.state.lock();
            state.total_destroyed += 1;
            state.free_slot();
        }
        self.released.notify_waiters();
        self.replenish();
    }

    /// Best-effort refill toward `min_connections` in the background.
    fn replenish(self: &Arc<Self>) {
        let reserved = self.reserve_deficit();
        self.fill_in_background(reserved);
    }

    /// Open `reserved` already-held slots on a spawned task.
    fn fill_in_background(self: &Arc<Self>, reserved: usize) {
        if reserved == 0 {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            let mut state = self.state.lock();
            for _ in 0..reserved {
                state.free_slot();
            }
            return;
        };

        let inner = Arc::clone(self);
        runtime.spawn(async move {
            let mut opened = 0usize;
            for _ in 0..reserved {
                if inner.fill_reserved().await {
                    opened += 1;
                }
            }
            debug!(pool = %inner.name(), opened, "Replenished pool toward minimum");
        });
    }

    /// Checkout step for the first caller on a cold pool. The caller keeps
    /// one warm-up slot; the rest are opened in the background.
    fn first_step(self: &Arc<Self>) -> (Step<T::Connection>, Vec<Slot<T::Connection>>) {
        let reserved = self.reserve_deficit();
        if reserved == 0 {
            return self.next_step();
        }
        info!(
            pool = %self.name(),
            requested = reserved,
            "Warming connection pool on first acquire"
        );
        self.fill_in_background(reserved - 1);
        (Step::Create, Vec::new())
    }

    fn next_step(&self) -> (Step<T::Connection>, Vec<Slot<T::Connection>>) {
        let mut state = self.state.lock();
        if state.closed {
            return (Step::Closed, Vec::new());
        }

        let now = Instant::now();
        let mut stale = Vec::new();
        while state
            .idle
            .front()
            .is_some_and(|slot| slot.idle_for(now) >= self.config.idle_timeout)
        {
            if let Some(slot) = state.idle.pop_front() {
                state.total_destroyed += 1;
                stale.push(slot);
            }
        }

        if let Some(slot) = state.idle.pop_back() {
            state.active += 1;
            return (Step::Reuse(slot), stale);
        }
        if state.total() < self.config.max_connections {
            state.active += 1;
            return (Step::Create, stale);
        }

        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { id, tx });
        state.total_waits += 1;
        (Step::Wait(id, rx), stale)
    }

    /// A queued caller went away. If its turn already came, pass it on.
    fn abandon_wait(&self, id: u64, rx: &mut oneshot::Receiver<Grant<T::Connection>>) {
        let leftover = {
            let mut state = self.state.lock();
            if state.remove_waiter(id) {
                return;
            }
            match rx.try_recv() {
                Ok(grant) => state.return_grant(grant),
                Err(_) => None,
            }
        };
        self.released.notify_waiters();
        drop(leftover);
    }
}

/// Slot held by a caller while a connection is opened or probed.
struct Reservation<'a, T: Transport> {
    inner: &'a PoolInner<T>,
    held: bool,
}

impl<'a, T: Transport> Reservation<'a, T> {
    const fn hold(inner: &'a PoolInner<T>) -> Self {
        Self { inner, held: true }
    }

    fn keep(mut self) {
        self.held = false;
    }
}

impl<T: Transport> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if self.held {
            self.inner.state.lock().free_slot();
            self.inner.released.notify_waiters();
        }
    }
}

/// A place in the waiter queue; leaving early hands the turn on.
struct WaitTurn<'a, T: Transport> {
    inner: &'a PoolInner<T>,
    id: u64,
    rx: oneshot::Receiver<Grant<T::Connection>>,
    settled: bool,
}

impl<T: Transport> Drop for WaitTurn<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.abandon_wait(self.id, &mut self.rx);
        }
    }
}

// =============================================================================
// CONNECTION POOL
// =============================================================================

/// Bounded, FIFO-fair pool of connections over a [`Transport`].
pub struct ConnectionPool<T: Transport> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Transport> ConnectionPool<T> {
    /// Create a pool. No connection is opened until [`warm_up`](Self::warm_up)
    /// or the first acquire.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] for an invalid configuration.
    pub fn new(config: PoolConfig, transport: T) -> Result<Self> {
        config.validate()?;
        info!(
            pool = %config.name,
            endpoint = %transport.endpoint(),
            pooling = config.enable_pooling,
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Creating connection pool"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                transport,
                state: Mutex::new(PoolState::new()),
                released: Notify::new(),
                warmed: AtomicBool::new(false),
                dedicated: AtomicUsize::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Open connections up to `min_connections`. Failures are logged and
    /// skipped; returns how many connections were opened.
    pub async fn warm_up(&self) -> usize {
        self.inner.warmed.store(true, Ordering::Release);
        let reserved = self.inner.reserve_deficit();
        if reserved == 0 {
            return 0;
        }

        let mut opened = 0;
        for _ in 0..reserved {
            if self.inner.fill_reserved().await {
                opened += 1;
            }
        }
        info!(pool = %self.name(), opened, requested = reserved, "Connection pool warmed up");
        opened
    }

    /// Lease a connection, waiting up to `acquire_timeout` when the pool is
    /// at capacity. Waiters are served strictly in arrival order.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Exhausted`] when no connection freed up in time
    /// - [`PoolError::Closed`] after shutdown
    /// - [`PoolError::Transport`] when a new connection could not be opened
    pub async fn acquire(&self) -> Result<PooledConnection<T>> {
        self.checkout(false, self.inner.config.validate_on_acquire).await
    }

    /// Like [`acquire`](Self::acquire), but a reused idle connection is
    /// always probed first and replaced if it fails.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_validated(&self) -> Result<PooledConnection<T>> {
        self.checkout(false, true).await
    }

    /// Lease a connection reserved for one caller (e.g. a subscriber).
    ///
    /// It is never recycled until returned with
    /// [`release_dedicated`](Self::release_dedicated).
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_dedicated(&self) -> Result<PooledConnection<T>> {
        self.checkout(true, self.inner.config.validate_on_acquire).await
    }

    async fn checkout(&self, dedicated: bool, validate: bool) -> Result<PooledConnection<T>> {
        if !self.inner.config.enable_pooling {
            return self.checkout_unpooled(dedicated).await;
        }
        let started = Instant::now();
        let (step, stale) = if self.inner.warmed.swap(true, Ordering::AcqRel) {
            self.inner.next_step()
        } else {
            self.inner.first_step()
        };
        let slot = match step {
            Step::Closed => return Err(self.inner.closed_error()),
            Step::Reuse(slot) if validate => self.validate_idle(slot).await?,
            Step::Reuse(slot) => slot,
            Step::Create => self.inner.connect_reserved().await?,
            Step::Wait(id, rx) => match self.wait_for_turn(id, rx, started).await? {
                Grant::Ready(slot) => slot,
                Grant::Reserved => self.inner.connect_reserved().await?,
                Grant::Closed => return Err(self.inner.closed_error()),
            },
        };
        let conn = self.lease(slot, dedicated);

        if !stale.is_empty() {
            for slot in stale {
                debug!(
                    pool = %self.name(),
                    connection_id = %slot.id,
                    "Closing connection past idle timeout"
                );
                self.inner.transport.close(slot.conn).await;
            }
            self.inner.replenish();
        }
        Ok(conn)
    }

    async fn checkout_unpooled(&self, dedicated: bool) -> Result<PooledConnection<T>> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(self.inner.closed_error());
            }
            state.active += 1;
        }
        let slot = self.inner.connect_reserved().await?;
        Ok(self.lease(slot, dedicated))
    }

    async fn validate_idle(&self, mut slot: Slot<T::Connection>) -> Result<Slot<T::Connection>> {
        let reservation = Reservation::hold(&self.inner);
        if self.inner.transport.is_valid(&mut slot.conn).await {
            reservation.keep();
            return Ok(slot);
        }

        warn!(
            pool = %self.name(),
            connection_id = %slot.id,
            "Idle connection failed validation, replacing it"
        );
        self.inner.retire(slot).await;
        reservation.keep();
        self.inner.connect_reserved().await
    }

    async fn wait_for_turn(
        &self,
        id: u64,
        rx: oneshot::Receiver<Grant<T::Connection>>,
        started: Instant,
    ) -> Result<Grant<T::Connection>> {
        let mut turn = WaitTurn {
            inner: &self.inner,
            id,
            rx,
            settled: false,
        };
        let remaining = self
            .inner
            .config
            .acquire_timeout
            .saturating_sub(started.elapsed());
        debug!(pool = %self.name(), waiter = id, "Pool at capacity, queueing");

        let outcome = tokio::time::timeout(remaining, &mut turn.rx).await;
        turn.settled = true;
        match outcome {
            Ok(Ok(grant)) => Ok(grant),
            Ok(Err(_)) => Ok(Grant::Closed),
            Err(_) => {
                let mut state = self.inner.state.lock();
                if state.remove_waiter(id) {
                    state.total_timeouts += 1;
                    drop(state);
                    let waited_ms =
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    warn!(pool = %self.name(), waited_ms, "Timed out waiting for a connection");
                    return Err(PoolError::Exhausted {
                        pool: self.inner.config.name.clone(),
                        waited_ms,
                    });
                }
                // Granted right at the deadline.
                Ok(turn.rx.try_recv().unwrap_or(Grant::Closed))
            }
        }
    }

    fn lease(&self, slot: Slot<T::Connection>, dedicated: bool) -> PooledConnection<T> {
        if dedicated {
            self.inner.dedicated.fetch_add(1, Ordering::AcqRel);
        }
        PooledConnection::lease(slot, dedicated, Arc::downgrade(&self.inner))
    }

    /// Run one command on a leased connection.
    ///
    /// A connection-level failure marks the connection closed so that
    /// releasing it destroys it instead of recycling it.
    ///
    /// # Errors
    ///
    /// [`PoolError::Transport`] for transport failures and
    /// [`PoolError::ConnectionUnhealthy`] when the handle is already closed.
    pub async fn execute(
        &self,
        conn: &mut PooledConnection<T>,
        command: &Command,
    ) -> Result<Reply> {
        let connection_id = conn.id();
        let Some(raw) = conn.connection_mut() else {
            return Err(PoolError::ConnectionUnhealthy {
                pool: self.inner.config.name.clone(),
                connection_id,
            });
        };

        match self.inner.transport.execute(raw, command).await {
            Ok(reply) => {
                conn.touch();
                Ok(reply)
            }
            Err(source) => {
                if source.is_connection_fault() {
                    warn!(
                        pool = %self.name(),
                        connection_id = %connection_id,
                        command = command.name(),
                        error = %source,
                        "Connection fault, closing connection"
                    );
                    conn.mark_broken();
                }
                Err(PoolError::Transport {
                    pool: self.inner.config.name.clone(),
                    source,
                })
            }
        }
    }

    /// Return a leased connection.
    ///
    /// The connection is probed first: healthy ones go to the oldest waiter
    /// or back to the idle set, broken ones are closed and their slot passed
    /// on. Dedicated leases released this way are closed.
    pub async fn release(&self, conn: PooledConnection<T>) {
        if conn.is_dedicated() {
            self.release_dedicated(conn, false).await;
            return;
        }
        self.check_in(conn).await;
    }

    /// Return a dedicated lease. Only an `unsubscribed` connection is safe
    /// to recycle; any other is closed.
    pub async fn release_dedicated(&self, mut conn: PooledConnection<T>, unsubscribed: bool) {
        if conn.is_dedicated() {
            self.inner.dedicated.fetch_sub(1, Ordering::AcqRel);
            conn.clear_dedicated();
            if !unsubscribed {
                debug!(
                    pool = %self.name(),
                    connection_id = %conn.id(),
                    "Dedicated connection still subscribed, closing"
                );
                conn.mark_broken();
            }
        }
        self.check_in(conn).await;
    }

    /// Close a leased connection without returning it to the pool.
    pub async fn destroy(&self, mut conn: PooledConnection<T>) {
        if conn.is_dedicated() {
            self.inner.dedicated.fetch_sub(1, Ordering::AcqRel);
            conn.clear_dedicated();
        }
        conn.mark_broken();
        if let Some(slot) = conn.take_slot() {
            self.inner.destroy(slot).await;
        }
    }

    async fn check_in(&self, mut conn: PooledConnection<T>) {
        let recyclable = self.inner.config.enable_pooling && !self.inner.is_closed();
        if !recyclable || !conn.begin_validation() {
            conn.mark_broken();
            if let Some(slot) = conn.take_slot() {
                self.inner.destroy(slot).await;
            }
            return;
        }

        let healthy = match conn.connection_mut() {
            Some(raw) => self.inner.transport.is_valid(raw).await,
            None => false,
        };
        conn.finish_validation(healthy);
        let Some(slot) = conn.take_slot() else {
            return;
        };

        if healthy {
            if let Some(leftover) = self.inner.recycle(slot) {
                self.inner.transport.close(leftover.conn).await;
            }
        } else {
            warn!(
                pool = %self.name(),
                connection_id = %slot.id,
                "Connection failed health check on release, closing"
            );
            self.inner.destroy(slot).await;
        }
    }

    /// Stop the pool.
    ///
    /// Queued and future acquires fail with [`PoolError::Closed`], idle
    /// connections are closed, and leased connections are waited for up to
    /// `shutdown_grace`; any released later are closed on return.
    pub async fn shutdown(&self) {
        let (waiters, idle) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.total_destroyed += state.idle.len() as u64;
            (
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.idle),
            )
        };

        let rejected = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Grant::Closed);
        }
        let closed_idle = idle.len();
        for slot in idle {
            self.inner.transport.close(slot.conn).await;
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_grace;
        loop {
            let released = self.inner.released.notified();
            let active = self.inner.state.lock().active;
            if active == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                warn!(
                    pool = %self.name(),
                    active,
                    "Shutdown grace elapsed with connections still leased"
                );
                break;
            }
        }

        info!(pool = %self.name(), rejected, closed_idle, "Connection pool shut down");
    }

    /// Snapshot of pool counters. Never fails.
    pub fn stats(&self) -> PoolStats {
        let config = &self.inner.config;
        let state = self.inner.state.lock();
        let dedicated_connections = self.inner.dedicated.load(Ordering::Acquire);

        if !config.enable_pooling {
            return PoolStats {
                name: config.name.clone(),
                pooling_enabled: false,
                closed: state.closed,
                max_connections: 1,
                min_connections: 0,
                total_connections: state.active,
                active_connections: state.active,
                idle_connections: 0,
                waiter_count: 0,
                dedicated_connections,
                total_created: state.total_created,
                total_destroyed: state.total_destroyed,
                total_waits: 0,
                total_timeouts: 0,
            };
        }

        PoolStats {
            name: config.name.clone(),
            pooling_enabled: true,
            closed: state.closed,
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            total_connections: state.total(),
            active_connections: state.active,
            idle_connections: state.idle.len(),
            waiter_count: state.live_waiters(),
            dedicated_connections,
            total_created: state.total_created,
            total_destroyed: state.total_destroyed,
            total_waits: state.total_waits,
            total_timeouts: state.total_timeouts,
        }
    }
}

impl<T: Transport> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.config.name)
            .field("endpoint", &self.inner.transport.endpoint())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use kvrelay_domain::ConnectionState;

    fn pool_with(config: PoolConfig) -> (ConnectionPool<MemoryTransport>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let pool = ConnectionPool::new(config, transport.clone()).expect("valid config");
        (pool, transport)
    }

    fn config(max: usize, min: usize) -> PoolConfig {
        PoolConfig {
            name: "test".to_string(),
            max_connections: max,
            min_connections: min,
            acquire_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_connections() {
        let (pool, transport) = pool_with(config(4, 2));
        assert_eq!(pool.warm_up().await, 2);

        let stats = pool.stats();
        assert_eq!(stats.idle_connections, 2);
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.total_created, 2);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_warm_up_tolerates_connect_failures() {
        let (pool, transport) = pool_with(config(4, 3));
        transport.fail_next_connects(2);
        assert_eq!(pool.warm_up().await, 1);
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let (pool, transport) = pool_with(config(4, 1));
        let conn = pool.acquire().await.unwrap();
        let first = conn.id();
        assert_eq!(conn.state(), ConnectionState::Active);
        pool.release(conn).await;

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), first);
        assert_eq!(transport.connect_count(), 1);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let (pool, _) = pool_with(PoolConfig {
            acquire_timeout: Duration::from_millis(50),
            ..config(1, 0)
        });
        let held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        match err {
            PoolError::Exhausted { pool: name, waited_ms } => {
                assert_eq!(name, "test");
                assert!(waited_ms >= 40, "waited only {waited_ms}ms");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }

        let stats = pool.stats();
        assert_eq!(stats.total_timeouts, 1);
        assert_eq!(stats.total_waits, 1);
        assert_eq!(stats.waiter_count, 0);
        assert_eq!(stats.active_connections, 1);
        pool.release(held).await;
    }

    #[tokio::test]
    async fn test_connect_failure_frees_slot() {
        let (pool, transport) = pool_with(config(1, 0));
        transport.fail_next_connects(1);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Transport { .. }));
        assert_eq!(pool.stats().total_connections, 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().active_connections, 1);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_unhealthy_connection_destroyed_on_release() {
        let (pool, transport) = pool_with(config(2, 0));
        let conn = pool.acquire().await.unwrap();
        transport.break_connections();
        pool.release(conn).await;

        let stats = pool.stats();
        assert_eq!(stats.total_destroyed, 1);
        assert_eq!(stats.idle_connections, 0);
        assert_eq!(stats.total_connections, 0);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_destroyed_connection_is_replaced_toward_min() {
        let (pool, transport) = pool_with(config(2, 1));
        let conn = pool.acquire().await.unwrap();
        transport.break_connections();
        pool.release(conn).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = pool.stats();
        assert_eq!(stats.idle_connections, 1);
        assert_eq!(stats.total_created, 2);
    }

    #[tokio::test]
    async fn test_execute_fault_marks_connection_closed() {
        let (pool, transport) = pool_with(config(2, 0));
        let mut conn = pool.acquire().await.unwrap();
        let reply = pool.execute(&mut conn, &Command::new("PING")).await.unwrap();
        assert_eq!(reply.as_str(), Some("PONG"));

        transport.break_connections();
        let err = pool
            .execute(&mut conn, &Command::new("GET").arg("k"))
            .await
            .unwrap_err();
        assert!(err.is_connection_fault());
        assert_eq!(conn.state(), ConnectionState::Closed);

        let err = pool.execute(&mut conn, &Command::new("PING")).await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionUnhealthy { .. }));

        pool.release(conn).await;
        assert_eq!(pool.stats().total_destroyed, 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_frees_slot() {
        let (pool, _) = pool_with(config(1, 0));
        let conn = pool.acquire().await.unwrap();
        drop(conn);

        let stats = pool.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_destroyed, 1);
        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_validate_on_acquire_replaces_broken_idle() {
        let (pool, transport) = pool_with(PoolConfig {
            validate_on_acquire: true,
            ..config(2, 0)
        });
        let conn = pool.acquire().await.unwrap();
        let first = conn.id();
        pool.release(conn).await;

        transport.break_connections();
        let conn = pool.acquire().await.unwrap();
        assert_ne!(conn.id(), first);
        assert_eq!(pool.stats().total_destroyed, 1);
        assert_eq!(pool.stats().active_connections, 1);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_acquire_validated_skips_broken_idle() {
        let (pool, transport) = pool_with(config(2, 0));
        let conn = pool.acquire().await.unwrap();
        let first = conn.id();
        pool.release(conn).await;

        transport.break_connections();
        let conn = pool.acquire_validated().await.unwrap();
        assert_ne!(conn.id(), first);
        pool.release(conn).await;
        assert_eq!(pool.stats().idle_connections, 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_stale_connections() {
        let (pool, transport) = pool_with(PoolConfig {
            idle_timeout: Duration::from_millis(20),
            ..config(2, 0)
        });
        let conn = pool.acquire().await.unwrap();
        let first = conn.id();
        pool.release(conn).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let conn = pool.acquire().await.unwrap();
        assert_ne!(conn.id(), first);
        assert_eq!(transport.close_count(), 1);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_idle_expiry_refills_toward_min() {
        let (pool, transport) = pool_with(PoolConfig {
            idle_timeout: Duration::from_millis(20),
            ..config(4, 2)
        });
        assert_eq!(pool.warm_up().await, 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let conn = pool.acquire().await.unwrap();
        assert_eq!(transport.close_count(), 2);

        for _ in 0..20 {
            if pool.stats().idle_connections == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = pool.stats();
        assert_eq!(stats.idle_connections, 1);
        assert_eq!(stats.total_connections, 2);
        assert_eq!(transport.connect_count(), 4);
        pool.release(conn).await;
    }

    #[tokio::test]
    async fn test_dedicated_lease_lifecycle() {
        let (pool, _) = pool_with(config(2, 0));

        let sub = pool.acquire_dedicated().await.unwrap();
        assert!(sub.is_dedicated());
        assert_eq!(pool.stats().dedicated_connections, 1);
        pool.release_dedicated(sub, false).await;
        let stats = pool.stats();
        assert_eq!(stats.dedicated_connections, 0);
        assert_eq!(stats.idle_connections, 0);
        assert_eq!(stats.total_destroyed, 1);

        let sub = pool.acquire_dedicated().await.unwrap();
        pool.release_dedicated(sub, true).await;
        assert_eq!(pool.stats().idle_connections, 1);
    }

    #[tokio::test]
    async fn test_unpooled_mode_opens_per_acquire() {
        let (pool, transport) = pool_with(PoolConfig {
            enable_pooling: false,
            ..config(4, 2)
        });
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());

        let stats = pool.stats();
        assert!(!stats.pooling_enabled);
        assert_eq!(stats.max_connections, 1);
        assert_eq!(stats.min_connections, 0);
        assert_eq!(stats.active_connections, 2);

        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.stats().idle_connections, 0);
        assert_eq!(transport.close_count(), 2);
    }

    #[tokio::test]
    async fn test_acquire_after_shutdown_fails() {
        let (pool, _) = pool_with(config(2, 1));
        pool.warm_up().await;
        pool.shutdown().await;

        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed { .. })));
        assert_eq!(pool.stats().total_connections, 0);
    }
}
