// SPDX-License-Identifier: Apache-2.0

//! In-memory backend for tests
//!
//! Every connection shares one [`MockState`]: counters for lifecycle calls, a
//! log of executed statements and a [`MockScript`] that decides the results,
//! failures and delays.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlgate_core::{EngineError, EngineResult, Row, Value};

use crate::traits::{Connector, DbConnection};

#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Rows returned by `fetch` unless a keyed response matches
    pub rows: Vec<Row>,
    /// `(needle, rows)`: the first needle contained in the SQL wins
    pub responses: Vec<(String, Vec<Row>)>,
    pub affected: u64,
    pub fail_connect: Option<String>,
    /// Connections beyond this many fail to open
    pub fail_connect_after: Option<usize>,
    pub fail_fetch: Option<String>,
    pub fail_execute: Option<String>,
    pub fail_begin: Option<String>,
    pub fail_commit: Option<String>,
    pub fail_rollback: Option<String>,
    pub connect_delay: Option<Duration>,
    pub statement_delay: Option<Duration>,
    pub close_delay: Option<Duration>,
    pub panic_on_close: bool,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    script: Mutex<MockScript>,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockState {
    /// Statements run so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn params_of(&self, index: usize) -> Option<Vec<Value>> {
        self.statements.lock().get(index).map(|(_, p)| p.clone())
    }

    /// Edits the script shared by all current and future connections
    pub fn script(&self, edit: impl FnOnce(&mut MockScript)) {
        edit(&mut self.script.lock());
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.connects
            .load(Ordering::SeqCst)
            .saturating_sub(self.closes.load(Ordering::SeqCst))
    }

    fn snapshot(&self) -> MockScript {
        self.script.lock().clone()
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.statements.lock().push((sql.to_string(), params.to_vec()));
    }
}

#[derive(Debug, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Arc<MockState> {
        &self.state
    }

    pub fn script(&self, edit: impl FnOnce(&mut MockScript)) {
        self.state.script(edit);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockConnection;

    fn driver_id(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> EngineResult<MockConnection> {
        let script = self.state.snapshot();
        if let Some(delay) = script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = script.fail_connect {
            return Err(EngineError::connection_failed(message));
        }
        let opened = self.state.connects.load(Ordering::SeqCst);
        if script.fail_connect_after.is_some_and(|limit| opened >= limit) {
            return Err(EngineError::connection_failed("connection limit reached"));
        }

        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection {
            id,
            state: self.state.clone(),
            in_transaction: false,
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    state: Arc<MockState>,
    in_transaction: bool,
}

impl MockConnection {
    /// 1-based order in which the connection was opened
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn pause(&self, script: &MockScript) {
        if let Some(delay) = script.statement_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DbConnection for MockConnection {
    async fn fetch(&mut self, sql: &str, params: &[Value]) -> EngineResult<Vec<Row>> {
        let script = self.state.snapshot();
        self.state.record(sql, params);
        self.pause(&script).await;
        if let Some(message) = script.fail_fetch {
            return Err(EngineError::execution_error(message));
        }
        let keyed = script
            .responses
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone());
        Ok(keyed.unwrap_or(script.rows))
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> EngineResult<u64> {
        let script = self.state.snapshot();
        self.state.record(sql, params);
        self.pause(&script).await;
        match script.fail_execute {
            Some(message) => Err(EngineError::execution_error(message)),
            None => Ok(script.affected),
        }
    }

    async fn begin(&mut self) -> EngineResult<()> {
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.snapshot().fail_begin {
            return Err(EngineError::transaction_error(message));
        }
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> EngineResult<()> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.snapshot().fail_commit {
            return Err(EngineError::transaction_error(message));
        }
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> EngineResult<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.snapshot().fail_rollback {
            return Err(EngineError::transaction_error(message));
        }
        self.in_transaction = false;
        Ok(())
    }

    async fn close(self) -> EngineResult<()> {
        let script = self.state.snapshot();
        if let Some(delay) = script.close_delay {
            tokio::time::sleep(delay).await;
        }
        if script.panic_on_close {
            panic!("mock connection {} panicked while closing", self.id);
        }
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
