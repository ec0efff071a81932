// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration
//!
//! Loaded once at start-up from the process environment and then shared
//! read-only (`Arc<GatewayConfig>`) by every component.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensitive::Sensitive;
use crate::types::RiskTier;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidInteger { key: &'static str, value: String },

    #[error("{key} must be a positive number of seconds, got '{value}'")]
    InvalidSeconds { key: &'static str, value: String },

    #[error("ALLOWED_RISK_LEVELS contains an unknown tier: '{value}'")]
    UnknownRiskTier { value: String },

    #[error("DB_POOL_MIN_SIZE ({min}) exceeds DB_POOL_MAX_SIZE ({max})")]
    PoolBounds { min: u32, max: u32 },

    #[error("DB_POOL_MAX_SIZE must be at least 1")]
    EmptyPool,
}

/// Deployment mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Unknown values fall back to development
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Sensitive<String>,
    pub database: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: Sensitive::default(),
            database: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Sizing and timing of each per-context pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    pub min_size: u32,
    pub max_size: u32,
    /// Idle time after which connections and whole pool entries are recycled
    pub recycle: Duration,
    /// None disables lifetime eviction
    pub max_lifetime: Option<Duration>,
    pub acquire_timeout: Duration,
    pub sweep_interval: Duration,
    /// Bound on one entry's teardown during a sweep
    pub close_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 20,
            recycle: Duration::from_secs(300),
            max_lifetime: None,
            acquire_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(300),
            close_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityConfig {
    pub allowed_risk_levels: BTreeSet<RiskTier>,
    pub enable_query_check: bool,
    pub max_sql_length: usize,
    pub blocked_patterns: Vec<String>,
    pub sensitive_info_fields: Vec<String>,
    pub allow_sensitive_info: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_risk_levels: BTreeSet::from([RiskTier::Low, RiskTier::Medium]),
            enable_query_check: true,
            max_sql_length: 1000,
            blocked_patterns: Vec::new(),
            sensitive_info_fields: Vec::new(),
            allow_sensitive_info: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub security: SecurityConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, treating blank values as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let environment = get("ENV_TYPE")
            .map(|v| Environment::parse(&v))
            .unwrap_or_default();

        let defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            host: get("MYSQL_HOST").unwrap_or(defaults.host),
            port: match get("MYSQL_PORT") {
                Some(v) => v.parse().map_err(|_| ConfigError::InvalidInteger {
                    key: "MYSQL_PORT",
                    value: v,
                })?,
                None => defaults.port,
            },
            user: get("MYSQL_USER").unwrap_or(defaults.user),
            password: Sensitive::new(lookup("MYSQL_PASSWORD").unwrap_or_default()),
            database: get("MYSQL_DATABASE"),
            connect_timeout: seconds(&get, "DB_CONNECTION_TIMEOUT", defaults.connect_timeout)?,
        };

        let pool = load_pool(&get)?;

        let mut security = SecurityConfig::default();
        match get("ALLOWED_RISK_LEVELS") {
            Some(list) => {
                security.allowed_risk_levels = split_list(&list)
                    .map(|tier| {
                        tier.parse::<RiskTier>()
                            .map_err(|_| ConfigError::UnknownRiskTier { value: tier })
                    })
                    .collect::<Result<_, _>>()?;
            }
            None if environment.is_production() => {
                security.allowed_risk_levels = BTreeSet::from([RiskTier::Low]);
            }
            None => {}
        }
        security.enable_query_check = get("ENABLE_QUERY_CHECK").map_or(true, |v| truthy(&v));
        let max_sql_length = integer(&get, "MAX_SQL_LENGTH", 1000)?;
        security.max_sql_length =
            usize::try_from(max_sql_length).map_err(|_| ConfigError::InvalidInteger {
                key: "MAX_SQL_LENGTH",
                value: max_sql_length.to_string(),
            })?;
        security.blocked_patterns = get("BLOCKED_PATTERNS")
            .map(|v| split_list(&v).collect())
            .unwrap_or_default();
        security.sensitive_info_fields = get("SENSITIVE_INFO_FIELDS")
            .map(|v| split_list(&v).collect())
            .unwrap_or_default();
        security.allow_sensitive_info =
            !environment.is_production() && get("ALLOW_SENSITIVE_INFO").is_some_and(|v| truthy(&v));

        Ok(Self {
            environment,
            database,
            pool,
            security,
        })
    }
}

fn load_pool<G>(get: &G) -> Result<PoolConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let defaults = PoolConfig::default();
    let mut min_size = pool_size(get, "DB_POOL_MIN_SIZE", defaults.min_size)?;
    let mut max_size = pool_size(get, "DB_POOL_MAX_SIZE", defaults.max_size)?;

    if get("DB_POOL_ENABLED").is_some_and(|v| !truthy(&v)) {
        min_size = 1;
        max_size = 1;
    }
    if max_size == 0 {
        return Err(ConfigError::EmptyPool);
    }
    if min_size > max_size {
        return Err(ConfigError::PoolBounds {
            min: min_size,
            max: max_size,
        });
    }

    let max_lifetime = integer(get, "DB_POOL_MAX_LIFETIME", 0)?;

    Ok(PoolConfig {
        min_size,
        max_size,
        recycle: seconds(get, "DB_POOL_RECYCLE", defaults.recycle)?,
        max_lifetime: (max_lifetime > 0).then(|| Duration::from_secs(max_lifetime)),
        acquire_timeout: seconds(get, "DB_POOL_ACQUIRE_TIMEOUT", defaults.acquire_timeout)?,
        sweep_interval: seconds(get, "DB_POOL_SWEEP_INTERVAL", defaults.sweep_interval)?,
        close_grace: seconds(get, "DB_POOL_CLOSE_GRACE", defaults.close_grace)?,
    })
}

fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn integer<G>(get: &G, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidInteger { key, value: v }),
        None => Ok(default),
    }
}

fn pool_size<G>(get: &G, key: &'static str, default: u32) -> Result<u32, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = integer(get, key, u64::from(default))?;
    u32::try_from(value).map_err(|_| ConfigError::InvalidInteger {
        key,
        value: value.to_string(),
    })
}

fn seconds<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(Duration::from_secs_f64(secs)),
        _ => Err(ConfigError::InvalidSeconds { key, value: raw }),
    }
}
