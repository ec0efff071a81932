// SPDX-License-Identifier: Apache-2.0

// sqlgate - risk-gated SQL gateway
// Core library

pub mod commands;
pub mod engine;
pub mod interceptor;
pub mod metrics;
pub mod observability;

use std::sync::Arc;

use sqlgate_core::{
    EngineError, ExecutionContextId, GatewayConfig, ResultEnvelope, StatementRequest,
};
use sqlgate_drivers::{Connector, ExecutionContext, MySqlConnector, PoolManager, SweeperHandle};
use tokio::task::JoinHandle;
use tracing::info;

pub use commands::Command;
use engine::TransactionExecutor;
use interceptor::{Interceptor, Verdict};

/// Gateway backed by MySQL
pub type MySqlGateway = Gateway<MySqlConnector>;

/// Interceptor, executor and per-context pools wired to one configuration
pub struct Gateway<C: Connector> {
    config: Arc<GatewayConfig>,
    interceptor: Interceptor,
    executor: TransactionExecutor<C>,
    pools: Arc<PoolManager<C>>,
}

impl<C: Connector> Gateway<C> {
    pub fn new(config: Arc<GatewayConfig>, connector: C) -> Self {
        let pools = Arc::new(PoolManager::new(Arc::new(connector), config.pool.clone()));
        let interceptor = Interceptor::new(config.clone());
        let executor = TransactionExecutor::new(config.clone(), pools.clone());

        info!(
            environment = ?config.environment,
            allowed_risk_levels = ?config.security.allowed_risk_levels,
            "Gateway initialized"
        );

        Self {
            config,
            interceptor,
            executor,
            pools,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    pub fn pools(&self) -> &Arc<PoolManager<C>> {
        &self.pools
    }

    /// Admits and runs one statement
    ///
    /// A denied statement never reaches the pool manager.
    pub async fn run_statement(&self, request: &StatementRequest) -> ResultEnvelope {
        match self.interceptor.intercept(request) {
            Verdict::Allow(classification) => self.executor.execute(request, &classification).await,
            Verdict::Deny(reason) => ResultEnvelope::failure(reason.kind(), reason.message()),
        }
    }

    /// Runs a command from the command table
    pub async fn execute(&self, command: Command, context: &ExecutionContextId) -> ResultEnvelope {
        command.dispatch(self, context).await
    }

    pub fn failure(&self, error: &EngineError) -> ResultEnvelope {
        self.executor.failure(error)
    }

    /// Starts the periodic pool sweep
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.pools.spawn_sweeper()
    }

    /// Closes the context's pool as soon as the context ends
    pub fn watch_context(&self, context: &ExecutionContext) -> JoinHandle<()> {
        self.pools.watch_context(context)
    }

    /// Closes the context's pool now; returns whether one existed
    pub async fn end_context(&self, context: &ExecutionContextId) -> bool {
        self.pools.close_context(context).await
    }

    /// Closes every pool
    pub async fn shutdown(&self) {
        self.pools.close_all().await;
        info!("Gateway shut down");
    }
}
