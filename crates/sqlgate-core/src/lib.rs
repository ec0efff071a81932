// SPDX-License-Identifier: Apache-2.0

//! Shared model of the SQL gateway: values, rows, result envelopes, the
//! error taxonomy and the configuration loaded at start-up.

pub mod config;
pub mod error;
pub mod sensitive;
pub mod types;

pub use config::{ConfigError, DatabaseConfig, Environment, GatewayConfig, PoolConfig, SecurityConfig};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use sensitive::Sensitive;
pub use types::{
    EnvelopeError, EnvelopeMetadata, ExecutionContextId, Pagination, ResultEnvelope, RiskTier, Row,
    StatementRequest, Value,
};
