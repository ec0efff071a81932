// SPDX-License-Identifier: Apache-2.0

//! Pool Manager
//!
//! Owns one connection pool per execution context. Entries are created on
//! the first acquire of a context, recycled by the periodic sweep when idle
//! or too old, and closed right away when their context ends.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sqlgate_core::{EngineError, EngineResult, ExecutionContextId, PoolConfig};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::pool::{ConnectionPool, PoolStatus, PooledConnection};
use crate::traits::Connector;

/// Caller-side execution scope with an end-of-life signal
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: ExecutionContextId,
    token: CancellationToken,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_id(ExecutionContextId::new())
    }

    pub fn with_id(id: ExecutionContextId) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &ExecutionContextId {
        &self.id
    }

    /// Signals that the context is over
    pub fn end(&self) {
        self.token.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a context's pool entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolEntryState {
    Uninitialized,
    Active,
    Recycled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecycleReason {
    Idle,
    MaxLifetime,
    ContextEnded,
    Shutdown,
}

struct PoolEntry<C: Connector> {
    id: u64,
    pool: ConnectionPool<C>,
    created_at: Instant,
    last_used: Mutex<Instant>,
}

impl<C: Connector> PoolEntry<C> {
    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn recycle_reason(&self, config: &PoolConfig, now: Instant) -> Option<RecycleReason> {
        if config
            .max_lifetime
            .is_some_and(|lifetime| now.saturating_duration_since(self.created_at) >= lifetime)
        {
            return Some(RecycleReason::MaxLifetime);
        }
        let last_used = *self.last_used.lock();
        if self.pool.in_use() == 0 && now.saturating_duration_since(last_used) >= config.recycle {
            return Some(RecycleReason::Idle);
        }
        None
    }
}

/// Read-only view of one pool entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEntrySnapshot {
    pub entry_id: u64,
    pub created_at: Instant,
    pub last_used: Instant,
    pub status: PoolStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseFailure {
    TimedOut,
    Panicked,
}

/// Outcome of one sweep cycle
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub recycled: Vec<(ExecutionContextId, RecycleReason)>,
    pub failed: Vec<(ExecutionContextId, CloseFailure)>,
    pub connections_reaped: usize,
    pub active_entries: usize,
}

pub struct PoolManager<C: Connector> {
    connector: Arc<C>,
    config: PoolConfig,
    entries: RwLock<HashMap<ExecutionContextId, PoolEntry<C>>>,
    /// Contexts whose entry was recycled since the previous sweep
    recycled: Mutex<HashSet<ExecutionContextId>>,
    /// Per-context gates so one caller warms up a new entry while the rest wait
    creating: Mutex<HashMap<ExecutionContextId, Arc<AsyncMutex<()>>>>,
    next_entry_id: AtomicU64,
}

impl<C: Connector> PoolManager<C> {
    pub fn new(connector: Arc<C>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            entries: RwLock::new(HashMap::new()),
            recycled: Mutex::new(HashSet::new()),
            creating: Mutex::new(HashMap::new()),
            next_entry_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Leases a connection from the context's pool, creating the pool on first use
    ///
    /// The whole call, including pool creation, is bounded by `limit`.
    #[instrument(skip(self, context), fields(context = %context, driver = self.connector.driver_id()))]
    pub async fn acquire(
        &self,
        context: &ExecutionContextId,
        limit: Duration,
    ) -> EngineResult<PooledConnection<C>> {
        let attempt = async {
            // A pool recycled between lookup and checkout is replaced once
            let mut retried = false;
            loop {
                let (entry_id, pool) = self.entry_for(context).await?;
                match pool.acquire_within(limit).await {
                    Ok(mut conn) => {
                        conn.bind(context.clone(), entry_id);
                        self.touch(context, entry_id).await;
                        return Ok(conn);
                    }
                    Err(EngineError::PoolClosed) if !retried => {
                        retried = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::PoolAcquireTimeout {
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Returns a connection to its pool
    ///
    /// If the entry was recycled in the meantime, the connection is closed.
    pub async fn release(&self, context: &ExecutionContextId, conn: PooledConnection<C>) {
        if conn.context().is_some_and(|owner| owner != context) {
            warn!(context = %context, "Connection released under a different context than it was acquired for");
        }
        self.touch(context, conn.entry_id()).await;
        conn.release().await;
    }

    /// Closes a connection that must not be reused
    pub async fn discard(&self, conn: PooledConnection<C>) {
        if let Some(context) = conn.context().cloned() {
            self.touch(&context, conn.entry_id()).await;
        }
        conn.discard().await;
    }

    async fn lookup(&self, context: &ExecutionContextId) -> Option<(u64, ConnectionPool<C>)> {
        let entries = self.entries.read().await;
        entries.get(context).map(|entry| (entry.id, entry.pool.clone()))
    }

    async fn entry_for(&self, context: &ExecutionContextId) -> EngineResult<(u64, ConnectionPool<C>)> {
        if let Some(found) = self.lookup(context).await {
            return Ok(found);
        }

        let gate = self.creating.lock().entry(context.clone()).or_default().clone();
        let result = {
            let _creating = gate.lock().await;
            match self.lookup(context).await {
                Some(found) => Ok(found),
                None => self.create_entry(context).await,
            }
        };

        // The map and this task hold the only references when nobody else waits
        let mut creating = self.creating.lock();
        if Arc::strong_count(&gate) == 2 {
            creating.remove(context);
        }
        result
    }

    /// Opens and registers a fresh pool; callers hold the context's gate
    async fn create_entry(&self, context: &ExecutionContextId) -> EngineResult<(u64, ConnectionPool<C>)> {
        let pool = ConnectionPool::open(self.connector.clone(), self.config.clone()).await?;

        let id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        self.entries.write().await.insert(
            context.clone(),
            PoolEntry {
                id,
                pool: pool.clone(),
                created_at: now,
                last_used: Mutex::new(now),
            },
        );
        self.recycled.lock().remove(context);
        info!(
            context = %context,
            entry_id = id,
            min_size = self.config.min_size,
            max_size = self.config.max_size,
            "Pool entry created"
        );
        Ok((id, pool))
    }

    async fn touch(&self, context: &ExecutionContextId, entry_id: u64) {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(context) {
            if entry.id == entry_id {
                entry.touch();
            }
        }
    }

    pub async fn state(&self, context: &ExecutionContextId) -> PoolEntryState {
        if self.entries.read().await.contains_key(context) {
            PoolEntryState::Active
        } else if self.recycled.lock().contains(context) {
            PoolEntryState::Recycled
        } else {
            PoolEntryState::Uninitialized
        }
    }

    pub async fn snapshot(&self, context: &ExecutionContextId) -> Option<PoolEntrySnapshot> {
        let entries = self.entries.read().await;
        entries.get(context).map(|entry| PoolEntrySnapshot {
            entry_id: entry.id,
            created_at: entry.created_at,
            last_used: *entry.last_used.lock(),
            status: entry.pool.status(),
        })
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Runs one sweep cycle as if the clock read `now`
    ///
    /// Recycles idle or over-age entries, then shrinks the surviving pools.
    /// A failing entry is logged and reported; it never stops the cycle.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        self.recycled.lock().clear();

        let doomed: Vec<(ExecutionContextId, PoolEntry<C>, RecycleReason)> = {
            let mut entries = self.entries.write().await;
            let expired: Vec<(ExecutionContextId, RecycleReason)> = entries
                .iter()
                .filter_map(|(ctx, entry)| {
                    entry
                        .recycle_reason(&self.config, now)
                        .map(|reason| (ctx.clone(), reason))
                })
                .collect();
            expired
                .into_iter()
                .filter_map(|(ctx, reason)| entries.remove(&ctx).map(|entry| (ctx, entry, reason)))
                .collect()
        };

        let mut report = SweepReport::default();
        for (context, entry, reason) in doomed {
            self.recycled.lock().insert(context.clone());
            match self.close_entry(&context, entry, reason).await {
                Ok(()) => report.recycled.push((context, reason)),
                Err(failure) => report.failed.push((context, failure)),
            }
        }

        let survivors: Vec<ConnectionPool<C>> = {
            let entries = self.entries.read().await;
            report.active_entries = entries.len();
            entries.values().map(|entry| entry.pool.clone()).collect()
        };
        for pool in survivors {
            report.connections_reaped += pool.reap_idle(now).await;
        }

        debug!(
            recycled = report.recycled.len(),
            failed = report.failed.len(),
            reaped = report.connections_reaped,
            active = report.active_entries,
            "Pool sweep finished"
        );
        report
    }

    /// Closes one entry on its own task, bounded by the close grace period
    async fn close_entry(
        &self,
        context: &ExecutionContextId,
        entry: PoolEntry<C>,
        reason: RecycleReason,
    ) -> Result<(), CloseFailure> {
        info!(context = %context, entry_id = entry.id, reason = ?reason, "Recycling pool entry");

        let pool = entry.pool;
        let task = tokio::spawn(async move { pool.close().await });

        match timeout(self.config.close_grace, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => {
                error!(context = %context, entry_id = entry.id, error = %join_error, "Pool close panicked");
                Err(CloseFailure::Panicked)
            }
            Err(_) => {
                warn!(
                    context = %context,
                    entry_id = entry.id,
                    grace_ms = self.config.close_grace.as_millis() as u64,
                    "Pool close exceeded grace period; left to finish in background"
                );
                Err(CloseFailure::TimedOut)
            }
        }
    }

    /// Tears down a context's entry now; returns whether one existed
    pub async fn close_context(&self, context: &ExecutionContextId) -> bool {
        let removed = self.entries.write().await.remove(context);
        match removed {
            Some(entry) => {
                self.recycled.lock().insert(context.clone());
                let _ = self.close_entry(context, entry, RecycleReason::ContextEnded).await;
                true
            }
            None => false,
        }
    }

    /// Closes every entry
    pub async fn close_all(&self) {
        let drained: Vec<(ExecutionContextId, PoolEntry<C>)> =
            self.entries.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        info!(entries = drained.len(), "Closing all pool entries");

        let closes = drained
            .into_iter()
            .map(|(context, entry)| async move {
                let _ = self.close_entry(&context, entry, RecycleReason::Shutdown).await;
            });
        futures::future::join_all(closes).await;
    }
}

impl<C: Connector> PoolManager<C> {
    /// Closes the context's entry as soon as the context ends
    pub fn watch_context(self: &Arc<Self>, context: &ExecutionContext) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let token = context.token().clone();
        let id = context.id().clone();

        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(manager) = manager.upgrade() {
                if manager.close_context(&id).await {
                    debug!(context = %id, "Pool entry closed on context end");
                }
            }
        })
    }

    /// Starts the periodic sweep; it stops when the handle is shut down or
    /// dropped, or when the manager itself is gone
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        let token = CancellationToken::new();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        let report = manager.sweep().await;
                        if !report.failed.is_empty() {
                            warn!(failed = report.failed.len(), "Pool sweep had failing entries");
                        }
                    }
                }
            }
            debug!("Pool sweeper stopped");
        });

        SweeperHandle {
            token,
            handle: Some(handle),
        }
    }
}

pub struct SweeperHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Pool sweeper task failed");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;
    use crate::traits::DbConnection;
    use std::sync::atomic::Ordering::SeqCst;

    fn config() -> PoolConfig {
        PoolConfig {
            min_size: 1,
            max_size: 2,
            recycle: Duration::from_secs(300),
            max_lifetime: None,
            acquire_timeout: Duration::from_millis(200),
            sweep_interval: Duration::from_secs(300),
            close_grace: Duration::from_millis(200),
        }
    }

    fn manager(config: PoolConfig) -> (Arc<MockConnector>, Arc<PoolManager<MockConnector>>) {
        let connector = Arc::new(MockConnector::new());
        let manager = Arc::new(PoolManager::new(connector.clone(), config));
        (connector, manager)
    }

    const LIMIT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn same_context_reuses_entry() {
        let (connector, manager) = manager(config());
        let ctx = ExecutionContextId::from("ctx-a");
        assert_eq!(manager.state(&ctx).await, PoolEntryState::Uninitialized);

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        manager.release(&ctx, conn).await;
        let first = manager.snapshot(&ctx).await.unwrap();

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        manager.release(&ctx, conn).await;
        let second = manager.snapshot(&ctx).await.unwrap();

        assert_eq!(first.entry_id, second.entry_id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.last_used >= first.last_used);
        assert_eq!(manager.state(&ctx).await, PoolEntryState::Active);
        assert_eq!(connector.state().connects.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_use_warms_up_once() {
        let mut cfg = config();
        cfg.min_size = 2;
        cfg.max_size = 4;
        let (connector, manager) = manager(cfg);
        connector.script(|s| s.connect_delay = Some(Duration::from_millis(20)));
        let ctx = ExecutionContextId::from("race");

        let leases = futures::future::join_all((0..4).map(|_| manager.acquire(&ctx, LIMIT))).await;
        let leases: Vec<_> = leases.into_iter().map(|lease| lease.unwrap()).collect();

        assert_eq!(manager.entry_count().await, 1);
        assert_eq!(connector.state().connects.load(SeqCst), 4);
        assert_eq!(connector.state().closes.load(SeqCst), 0);
        assert!(manager.creating.lock().is_empty());
        for conn in leases {
            manager.release(&ctx, conn).await;
        }
    }

    #[tokio::test]
    async fn contexts_are_isolated() {
        let (_, manager) = manager(config());
        let a = ExecutionContextId::from("a");
        let b = ExecutionContextId::from("b");

        let ca = manager.acquire(&a, LIMIT).await.unwrap();
        let cb = manager.acquire(&b, LIMIT).await.unwrap();
        assert_ne!(ca.id(), cb.id());
        assert_ne!(
            manager.snapshot(&a).await.unwrap().entry_id,
            manager.snapshot(&b).await.unwrap().entry_id
        );
        manager.release(&a, ca).await;
        manager.release(&b, cb).await;
        assert_eq!(manager.entry_count().await, 2);
    }

    #[tokio::test]
    async fn idle_entry_is_recycled_and_recreated() {
        let (connector, manager) = manager(config());
        let ctx = ExecutionContextId::from("ctx-idle");

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        manager.release(&ctx, conn).await;
        let before = manager.snapshot(&ctx).await.unwrap();

        let report = manager
            .sweep_at(Instant::now() + Duration::from_secs(301))
            .await;
        assert_eq!(report.recycled, vec![(ctx.clone(), RecycleReason::Idle)]);
        assert_eq!(manager.state(&ctx).await, PoolEntryState::Recycled);
        assert_eq!(connector.state().open_connections(), 0);

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        let after = manager.snapshot(&ctx).await.unwrap();
        assert_ne!(after.entry_id, before.entry_id);
        assert!(after.created_at > before.created_at);
        assert_eq!(manager.state(&ctx).await, PoolEntryState::Active);
        manager.release(&ctx, conn).await;
    }

    #[tokio::test]
    async fn busy_entry_survives_idle_sweep() {
        let (_, manager) = manager(config());
        let ctx = ExecutionContextId::from("busy");

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        let report = manager
            .sweep_at(Instant::now() + Duration::from_secs(301))
            .await;
        assert!(report.recycled.is_empty());
        assert_eq!(report.active_entries, 1);
        manager.release(&ctx, conn).await;
    }

    #[tokio::test]
    async fn lifetime_recycles_even_when_recently_used() {
        let mut cfg = config();
        cfg.max_lifetime = Some(Duration::from_secs(60));
        let (_, manager) = manager(cfg);
        let ctx = ExecutionContextId::from("old");

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        manager.release(&ctx, conn).await;

        let report = manager
            .sweep_at(Instant::now() + Duration::from_secs(61))
            .await;
        assert_eq!(report.recycled, vec![(ctx, RecycleReason::MaxLifetime)]);
    }

    #[tokio::test]
    async fn release_after_recycle_closes_connection() {
        let (connector, manager) = manager(config());
        let ctx = ExecutionContextId::from("late");

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        assert!(manager.close_context(&ctx).await);
        assert!(!manager.close_context(&ctx).await);

        manager.release(&ctx, conn).await;
        assert_eq!(connector.state().open_connections(), 0);
    }

    #[tokio::test]
    async fn saturated_context_times_out() {
        let (_, manager) = manager(config());
        let ctx = ExecutionContextId::from("full");

        let a = manager.acquire(&ctx, LIMIT).await.unwrap();
        let b = manager.acquire(&ctx, LIMIT).await.unwrap();
        let err = manager
            .acquire(&ctx, Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::PoolAcquireTimeout { timeout_ms: 50 }));

        manager.release(&ctx, a).await;
        manager.release(&ctx, b).await;
    }

    #[tokio::test]
    async fn connect_failure_records_no_entry() {
        let (connector, manager) = manager(config());
        connector.script(|s| s.fail_connect = Some("access denied".into()));
        let ctx = ExecutionContextId::from("denied");

        let err = manager.acquire(&ctx, LIMIT).await.err().unwrap();
        assert_eq!(err.kind(), sqlgate_core::ErrorKind::DbConnectionError);
        assert_eq!(manager.state(&ctx).await, PoolEntryState::Uninitialized);
    }

    #[tokio::test]
    async fn ended_context_closes_its_pool() {
        let (connector, manager) = manager(config());
        let ctx = ExecutionContext::new();
        let watcher = manager.watch_context(&ctx);

        let conn = manager.acquire(ctx.id(), LIMIT).await.unwrap();
        manager.release(ctx.id(), conn).await;
        assert_eq!(connector.state().open_connections(), 1);

        ctx.end();
        watcher.await.unwrap();
        assert_eq!(manager.state(ctx.id()).await, PoolEntryState::Recycled);
        assert_eq!(connector.state().open_connections(), 0);
    }

    #[tokio::test]
    async fn in_flight_connection_survives_context_end() {
        let (connector, manager) = manager(config());
        let ctx = ExecutionContext::new();
        let watcher = manager.watch_context(&ctx);

        let mut conn = manager.acquire(ctx.id(), LIMIT).await.unwrap();
        ctx.end();
        watcher.await.unwrap();

        assert!(conn.execute("UPDATE t SET a = 1 WHERE id = 1", &[]).await.is_ok());
        manager.release(ctx.id(), conn).await;
        assert_eq!(connector.state().open_connections(), 0);
    }

    #[tokio::test]
    async fn sweep_isolates_hanging_close() {
        let mut cfg = config();
        cfg.close_grace = Duration::from_millis(30);
        let (connector, manager) = manager(cfg);
        let ctx = ExecutionContextId::from("stuck");

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        manager.release(&ctx, conn).await;
        connector.script(|s| s.close_delay = Some(Duration::from_secs(5)));

        let started = std::time::Instant::now();
        let report = manager
            .sweep_at(Instant::now() + Duration::from_secs(301))
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.failed, vec![(ctx.clone(), CloseFailure::TimedOut)]);
        assert_eq!(manager.state(&ctx).await, PoolEntryState::Recycled);
    }

    #[tokio::test]
    async fn sweep_isolates_panicking_close() {
        let (connector, manager) = manager(config());
        let a = ExecutionContextId::from("a");
        let b = ExecutionContextId::from("b");
        for ctx in [&a, &b] {
            let conn = manager.acquire(ctx, LIMIT).await.unwrap();
            manager.release(ctx, conn).await;
        }
        connector.script(|s| s.panic_on_close = true);

        let report = manager
            .sweep_at(Instant::now() + Duration::from_secs(301))
            .await;
        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .all(|(_, failure)| *failure == CloseFailure::Panicked));

        connector.script(|s| s.panic_on_close = false);
        let conn = manager.acquire(&a, LIMIT).await.unwrap();
        manager.release(&a, conn).await;
        assert_eq!(manager.state(&a).await, PoolEntryState::Active);
    }

    #[tokio::test]
    async fn sweep_shrinks_surviving_pools() {
        let mut cfg = config();
        cfg.max_size = 3;
        let (connector, manager) = manager(cfg);
        let ctx = ExecutionContextId::from("grow");

        let a = manager.acquire(&ctx, LIMIT).await.unwrap();
        let b = manager.acquire(&ctx, LIMIT).await.unwrap();
        let c = manager.acquire(&ctx, LIMIT).await.unwrap();
        manager.release(&ctx, a).await;
        manager.release(&ctx, b).await;

        // `c` keeps the entry busy while idle connections shrink toward min
        let report = manager
            .sweep_at(Instant::now() + Duration::from_secs(301))
            .await;
        assert!(report.recycled.is_empty());
        assert_eq!(report.connections_reaped, 2);
        manager.release(&ctx, c).await;
        assert_eq!(connector.state().open_connections(), 1);
    }

    #[tokio::test]
    async fn background_sweeper_recycles_idle_entries() {
        let mut cfg = config();
        cfg.recycle = Duration::from_millis(20);
        cfg.sweep_interval = Duration::from_millis(30);
        let (connector, manager) = manager(cfg);
        let ctx = ExecutionContextId::from("bg");

        let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
        manager.release(&ctx, conn).await;
        let sweeper = manager.spawn_sweeper();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.entry_count().await, 0);
        assert_eq!(connector.state().open_connections(), 0);
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn close_all_empties_manager() {
        let (connector, manager) = manager(config());
        for name in ["x", "y", "z"] {
            let ctx = ExecutionContextId::from(name);
            let conn = manager.acquire(&ctx, LIMIT).await.unwrap();
            manager.release(&ctx, conn).await;
        }
        manager.close_all().await;
        manager.close_all().await;
        assert_eq!(manager.entry_count().await, 0);
        assert_eq!(connector.state().open_connections(), 0);
    }
}
