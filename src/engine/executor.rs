// SPDX-License-Identifier: Apache-2.0

//! Transaction Executor
//!
//! Runs admitted statements on a connection leased from the context's pool.
//! Reads return masked rows. Writes run inside an explicit transaction and
//! return the affected-row count. A connection goes back to the pool only
//! after a clean commit or rollback; anything else closes it. Statements of
//! unknown kind (`SET`, `LOCK TABLES`, `START TRANSACTION`, ...) may leave
//! session state behind, so their connection is always closed afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlgate_core::{EngineError, EngineResult, GatewayConfig, ResultEnvelope, StatementRequest};
use sqlgate_drivers::{Connector, DbConnection, PoolManager, PooledConnection};
use sqlgate_sql::{Classification, OperationKind};
use tracing::{debug, error, info, instrument, warn};

use super::masking::Masker;
use super::sanitize::sanitize_message;
use crate::metrics;

const SLOW_STATEMENT: Duration = Duration::from_millis(1000);
const NOTABLE_STATEMENT: Duration = Duration::from_millis(500);

/// Statements that run inside an explicit transaction
fn is_transactional(kind: OperationKind) -> bool {
    matches!(
        kind,
        OperationKind::Insert | OperationKind::Update | OperationKind::Delete | OperationKind::Ddl(_)
    )
}

pub struct TransactionExecutor<C: Connector> {
    config: Arc<GatewayConfig>,
    pools: Arc<PoolManager<C>>,
    masker: Masker,
}

impl<C: Connector> TransactionExecutor<C> {
    pub fn new(config: Arc<GatewayConfig>, pools: Arc<PoolManager<C>>) -> Self {
        let masker = Masker::new(&config.security);
        Self {
            config,
            pools,
            masker,
        }
    }

    /// Executes an admitted statement; failures come back inside the envelope
    #[instrument(
        skip_all,
        fields(
            context = %request.context(),
            operation = %classification.keyword,
            tier = %classification.tier
        )
    )]
    pub async fn execute(
        &self,
        request: &StatementRequest,
        classification: &Classification,
    ) -> ResultEnvelope {
        let started = Instant::now();
        let outcome = self.run(request, classification).await;
        let elapsed = started.elapsed();

        log_timing(operation_name(classification), elapsed, outcome.is_ok());
        metrics::record_statement(elapsed.as_secs_f64() * 1000.0, outcome.is_ok());

        match outcome {
            Ok(envelope) => envelope,
            Err(e) => self.failure(&e),
        }
    }

    /// Converts an error into a failure envelope, sanitizing driver detail in production
    pub fn failure(&self, error: &EngineError) -> ResultEnvelope {
        let kind = error.kind();
        if matches!(error, EngineError::PoolAcquireTimeout { .. }) {
            metrics::record_acquire_timeout();
        }

        let message = error.to_string();
        let message = if self.config.environment.is_production() && kind.carries_driver_detail() {
            sanitize_message(&message)
        } else {
            message
        };
        ResultEnvelope::failure(kind, message)
    }

    async fn run(
        &self,
        request: &StatementRequest,
        classification: &Classification,
    ) -> EngineResult<ResultEnvelope> {
        let conn = self
            .pools
            .acquire(request.context(), self.config.pool.acquire_timeout)
            .await?;
        let operation = operation_name(classification);

        if is_transactional(classification.kind) {
            self.write(conn, request, operation).await
        } else {
            let reusable = classification.kind != OperationKind::Other;
            self.read(conn, request, operation, reusable).await
        }
    }

    async fn read(
        &self,
        mut conn: PooledConnection<C>,
        request: &StatementRequest,
        operation: &str,
        reusable: bool,
    ) -> EngineResult<ResultEnvelope> {
        let outcome = conn.fetch(request.sql(), request.params()).await;
        if !reusable {
            debug!(operation, "Closing connection after session-level statement");
            self.pools.discard(conn).await;
            let mut rows = outcome?;
            self.masker.mask_rows(&mut rows);
            return Ok(ResultEnvelope::rows(operation, rows));
        }

        match outcome {
            Ok(mut rows) => {
                self.pools.release(request.context(), conn).await;
                self.masker.mask_rows(&mut rows);
                Ok(ResultEnvelope::rows(operation, rows))
            }
            Err(e) => {
                self.finish_failed(request, conn, &e).await;
                Err(e)
            }
        }
    }

    async fn write(
        &self,
        mut conn: PooledConnection<C>,
        request: &StatementRequest,
        operation: &str,
    ) -> EngineResult<ResultEnvelope> {
        if let Err(e) = conn.begin().await {
            warn!(error = %e, "Could not start transaction, closing connection");
            self.pools.discard(conn).await;
            return Err(e);
        }

        let outcome = match conn.execute(request.sql(), request.params()).await {
            Ok(affected) => conn.commit().await.map(|()| affected),
            Err(e) => Err(e),
        };

        let cause = match outcome {
            Ok(affected) => {
                self.pools.release(request.context(), conn).await;
                debug!(affected_rows = affected, "Transaction committed");
                return Ok(ResultEnvelope::affected(operation, affected));
            }
            Err(cause) => cause,
        };

        if cause.is_connection_lost() {
            self.pools.discard(conn).await;
            return Err(cause);
        }

        match conn.rollback().await {
            Ok(()) => {
                debug!(error = %cause, "Transaction rolled back");
                self.pools.release(request.context(), conn).await;
                Err(cause)
            }
            Err(rollback) => {
                error!(
                    error = %cause,
                    rollback_error = %rollback,
                    "Rollback failed, closing connection"
                );
                self.pools.discard(conn).await;
                Err(EngineError::rollback_failed(&cause, &rollback))
            }
        }
    }

    async fn finish_failed(
        &self,
        request: &StatementRequest,
        conn: PooledConnection<C>,
        error: &EngineError,
    ) {
        if error.is_connection_lost() {
            warn!(error = %error, "Connection lost, closing it");
            self.pools.discard(conn).await;
        } else {
            self.pools.release(request.context(), conn).await;
        }
    }
}

fn operation_name(classification: &Classification) -> &str {
    if classification.keyword.is_empty() {
        "UNKNOWN"
    } else {
        &classification.keyword
    }
}

fn log_timing(operation: &str, elapsed: Duration, success: bool) {
    let elapsed_ms = elapsed.as_millis() as u64;
    if elapsed >= SLOW_STATEMENT {
        warn!(operation, elapsed_ms, success, "Slow statement");
    } else if elapsed >= NOTABLE_STATEMENT {
        info!(operation, elapsed_ms, success, "Statement finished");
    } else {
        debug!(operation, elapsed_ms, success, "Statement finished");
    }
}
