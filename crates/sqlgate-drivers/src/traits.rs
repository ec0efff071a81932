// SPDX-License-Identifier: Apache-2.0

//! Connection abstraction
//!
//! The pool manager only ever talks to these two traits. The MySQL backend
//! implements them on top of `sqlx`; tests use the in-memory mock.

use async_trait::async_trait;
use sqlgate_core::{EngineResult, Row, Value};

/// Opens new connections to one database endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: DbConnection;

    /// Returns a short identifier for logs (e.g. "mysql")
    fn driver_id(&self) -> &'static str;

    /// Establishes one new connection
    async fn connect(&self) -> EngineResult<Self::Conn>;
}

/// A single live database connection
#[async_trait]
pub trait DbConnection: Send + 'static {
    /// Runs a row-returning statement
    async fn fetch(&mut self, sql: &str, params: &[Value]) -> EngineResult<Vec<Row>>;

    /// Runs a statement and returns the affected-row count
    async fn execute(&mut self, sql: &str, params: &[Value]) -> EngineResult<u64>;

    async fn begin(&mut self) -> EngineResult<()>;

    async fn commit(&mut self) -> EngineResult<()>;

    async fn rollback(&mut self) -> EngineResult<()>;

    /// Closes the connection; must not fail on an already broken connection
    async fn close(self) -> EngineResult<()>;
}
