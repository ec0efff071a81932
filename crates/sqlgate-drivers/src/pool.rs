// SPDX-License-Identifier: Apache-2.0

//! Bounded connection pool
//!
//! A semaphore with `max_size` permits bounds the connections checked out at
//! once. Idle connections wait in a queue and are recycled on checkout or by
//! `reap_idle` once they sat idle past the recycle threshold or outlived the
//! configured max lifetime.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlgate_core::{EngineError, EngineResult, ExecutionContextId, PoolConfig};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::traits::{Connector, DbConnection};

struct IdleConnection<T> {
    conn: T,
    created_at: Instant,
    idle_since: Instant,
}

pub(crate) struct PoolInner<C: Connector> {
    connector: Arc<C>,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection<C::Conn>>>,
    semaphore: Arc<Semaphore>,
    size: AtomicU32,
    closed: AtomicBool,
}

impl<C: Connector> PoolInner<C> {
    fn outlived(&self, created_at: Instant, now: Instant) -> bool {
        self.config
            .max_lifetime
            .is_some_and(|lifetime| now.saturating_duration_since(created_at) >= lifetime)
    }

    fn idle_too_long(&self, idle_since: Instant, now: Instant) -> bool {
        now.saturating_duration_since(idle_since) >= self.config.recycle
    }

    /// The count drops before the close is awaited, so a caller cancelled
    /// mid-close (an acquire timing out) cannot leave it inflated
    async fn close_connection(&self, conn: C::Conn) {
        self.size.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = conn.close().await {
            debug!(driver = self.connector.driver_id(), error = %e, "Closing pooled connection failed");
        }
    }

    /// Returns a healthy connection to the idle queue, or closes it when the
    /// pool is gone or the connection outlived its lifetime
    async fn put_back(&self, conn: C::Conn, created_at: Instant) {
        let now = Instant::now();
        if self.outlived(created_at, now) {
            self.close_connection(conn).await;
            return;
        }

        let rejected = {
            let mut idle = self.idle.lock();
            if self.closed.load(Ordering::Acquire) {
                Some(conn)
            } else {
                idle.push_back(IdleConnection {
                    conn,
                    created_at,
                    idle_since: now,
                });
                None
            }
        };

        if let Some(conn) = rejected {
            self.close_connection(conn).await;
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub in_use: usize,
    pub closed: bool,
}

pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: Arc<C>, config: PoolConfig) -> Self {
        let permits = config.max_size.max(1) as usize;
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                idle: Mutex::new(VecDeque::new()),
                semaphore: Arc::new(Semaphore::new(permits)),
                size: AtomicU32::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Builds a pool and opens `min_size` connections up front
    ///
    /// If any of them fails, the ones already opened are closed again.
    pub async fn open(connector: Arc<C>, config: PoolConfig) -> EngineResult<Self> {
        let pool = Self::new(connector, config);
        let now = Instant::now();
        for _ in 0..pool.inner.config.min_size {
            match pool.inner.connector.connect().await {
                Ok(conn) => {
                    pool.inner.size.fetch_add(1, Ordering::AcqRel);
                    pool.inner.idle.lock().push_back(IdleConnection {
                        conn,
                        created_at: now,
                        idle_since: now,
                    });
                }
                Err(e) => {
                    pool.close().await;
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Checks out a connection, waiting at most the configured acquire timeout
    pub async fn acquire(&self) -> EngineResult<PooledConnection<C>> {
        self.acquire_within(self.inner.config.acquire_timeout).await
    }

    pub async fn acquire_within(&self, limit: Duration) -> EngineResult<PooledConnection<C>> {
        match timeout(limit, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::PoolAcquireTimeout {
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    async fn acquire_inner(&self) -> EngineResult<PooledConnection<C>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EngineError::PoolClosed);
        }

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;

        loop {
            // Most recently returned first, so the oldest idle ones age out
            let candidate = self.inner.idle.lock().pop_back();
            let Some(idle) = candidate else { break };

            let now = Instant::now();
            if self.inner.outlived(idle.created_at, now) || self.inner.idle_too_long(idle.idle_since, now) {
                self.inner.close_connection(idle.conn).await;
                continue;
            }
            return Ok(PooledConnection::new(idle.conn, idle.created_at, permit, self.inner.clone()));
        }

        let conn = self.inner.connector.connect().await?;
        self.inner.size.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection::new(conn, Instant::now(), permit, self.inner.clone()))
    }

    /// Closes idle connections that sat idle past the recycle threshold,
    /// never shrinking below `min_size`; connections past their lifetime are
    /// always closed. Returns how many were closed.
    pub async fn reap_idle(&self, now: Instant) -> usize {
        let doomed: Vec<C::Conn> = {
            let mut idle = self.inner.idle.lock();
            let live = self.inner.size.load(Ordering::Acquire) as usize;
            let mut shrinkable = live.saturating_sub(self.inner.config.min_size as usize);
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut doomed = Vec::new();

            for entry in idle.drain(..) {
                if self.inner.outlived(entry.created_at, now) {
                    shrinkable = shrinkable.saturating_sub(1);
                    doomed.push(entry.conn);
                } else if shrinkable > 0 && self.inner.idle_too_long(entry.idle_since, now) {
                    shrinkable -= 1;
                    doomed.push(entry.conn);
                } else {
                    kept.push_back(entry);
                }
            }
            *idle = kept;
            doomed
        };

        let reaped = doomed.len();
        for conn in doomed {
            self.inner.close_connection(conn).await;
        }
        reaped
    }

    /// Stops handing out connections and closes the idle ones; idempotent
    ///
    /// Connections still checked out are closed when they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();

        let drained: Vec<C::Conn> = {
            let mut idle = self.inner.idle.lock();
            idle.drain(..).map(|entry| entry.conn).collect()
        };
        for conn in drained {
            self.inner.close_connection(conn).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn size(&self) -> u32 {
        self.inner.size.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Leases outstanding, including acquires that are still connecting
    pub fn in_use(&self) -> usize {
        let max = self.inner.config.max_size.max(1) as usize;
        max.saturating_sub(self.inner.semaphore.available_permits())
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.size(),
            idle: self.idle_count(),
            in_use: self.in_use(),
            closed: self.is_closed(),
        }
    }
}

/// A leased connection
///
/// Give it back with [`PooledConnection::release`], or throw it away with
/// [`PooledConnection::discard`]. A lease that is simply dropped closes its
/// connection instead of returning it, since its transaction state is unknown.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Conn>,
    created_at: Instant,
    pool: Arc<PoolInner<C>>,
    context: Option<ExecutionContextId>,
    entry_id: u64,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    fn new(conn: C::Conn, created_at: Instant, permit: OwnedSemaphorePermit, pool: Arc<PoolInner<C>>) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            pool,
            context: None,
            entry_id: 0,
            _permit: permit,
        }
    }

    pub(crate) fn bind(&mut self, context: ExecutionContextId, entry_id: u64) {
        self.context = Some(context);
        self.entry_id = entry_id;
    }

    /// Execution context the lease was handed out for, if any
    pub fn context(&self) -> Option<&ExecutionContextId> {
        self.context.as_ref()
    }

    pub(crate) fn entry_id(&self) -> u64 {
        self.entry_id
    }

    /// Returns the connection to its pool (closing it if the pool is gone)
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn, self.created_at).await;
        }
    }

    /// Closes the connection instead of returning it
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.close_connection(conn).await;
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        warn!(
            driver = self.pool.connector.driver_id(),
            context = ?self.context,
            "Connection lease dropped without release; closing it"
        );
        let pool = self.pool.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.close_connection(conn).await;
                });
            }
            Err(_) => {
                drop(conn);
                pool.size.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}
