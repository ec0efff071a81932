// SPDX-License-Identifier: Apache-2.0

//! Database access for the gateway: the connection traits, a bounded pool,
//! the per-context pool manager and the MySQL backend.

pub mod manager;
pub mod mysql;
pub mod pool;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use manager::{
    CloseFailure, ExecutionContext, PoolEntrySnapshot, PoolEntryState, PoolManager, RecycleReason,
    SweepReport, SweeperHandle,
};
pub use mysql::{MySqlConn, MySqlConnector};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use traits::{Connector, DbConnection};
