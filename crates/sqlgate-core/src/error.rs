// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the gateway
//!
//! Driver-specific and pipeline failures are mapped to these unified error
//! types, and every one of them resolves to an [`ErrorKind`] that the caller
//! sees inside a result envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-visible failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    StatementTooLong,
    BlockedPatternMatched,
    RiskTierNotAllowed,
    PoolAcquireTimeout,
    DbExecutionError,
    DbConnectionError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::StatementTooLong => "STATEMENT_TOO_LONG",
            Self::BlockedPatternMatched => "BLOCKED_PATTERN_MATCHED",
            Self::RiskTierNotAllowed => "RISK_TIER_NOT_ALLOWED",
            Self::PoolAcquireTimeout => "POOL_ACQUIRE_TIMEOUT",
            Self::DbExecutionError => "DB_EXECUTION_ERROR",
            Self::DbConnectionError => "DB_CONNECTION_ERROR",
        }
    }

    /// Whether the message may carry driver detail (paths, hosts, credentials)
    pub fn carries_driver_detail(&self) -> bool {
        matches!(self, Self::DbExecutionError | Self::DbConnectionError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for all gateway operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    /// The connection broke mid-statement and must not be reused
    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    #[error("Rollback failed after error: {cause}; rollback error: {rollback}")]
    RollbackFailed { cause: String, rollback: String },

    #[error("Timed out acquiring a pooled connection after {timeout_ms}ms")]
    PoolAcquireTimeout { timeout_ms: u64 },

    #[error("Connection pool has been closed")]
    PoolClosed,

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

impl EngineError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost { message: msg.into() }
    }

    pub fn transaction_error(msg: impl Into<String>) -> Self {
        Self::TransactionError { message: msg.into() }
    }

    pub fn rollback_failed(cause: &EngineError, rollback: &EngineError) -> Self {
        Self::RollbackFailed {
            cause: cause.to_string(),
            rollback: rollback.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    /// Maps the error onto the caller-visible taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed { .. } | Self::PoolClosed => ErrorKind::DbConnectionError,
            Self::ExecutionError { .. }
            | Self::ConnectionLost { .. }
            | Self::TransactionError { .. }
            | Self::RollbackFailed { .. } => ErrorKind::DbExecutionError,
            Self::PoolAcquireTimeout { .. } => ErrorKind::PoolAcquireTimeout,
            Self::ValidationError { .. } => ErrorKind::ValidationError,
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
