// SPDX-License-Identifier: Apache-2.0

//! Interceptor Pipeline
//!
//! Admission runs in a fixed order and stops at the first failure:
//! 1. Empty statement
//! 2. Length cap
//! 3. Blocked patterns
//! 4. Classification and tier admission
//!
//! Denials are the only place a statement's text is logged.

use std::sync::Arc;

use sqlgate_core::{GatewayConfig, StatementRequest};
use sqlgate_sql::{classify, evaluate, Classification, Decision, DenyReason};
use tracing::{debug, warn};

use super::patterns::BlockedPatterns;
use crate::metrics;

const PREVIEW_CHARS: usize = 100;

/// Outcome of running a statement through the interceptor
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow(Classification),
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

pub struct Interceptor {
    config: Arc<GatewayConfig>,
    blocked: BlockedPatterns,
}

impl Interceptor {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        let blocked = BlockedPatterns::new(config.security.blocked_patterns.as_slice());
        debug!(
            blocked_patterns = blocked.len(),
            query_check = config.security.enable_query_check,
            "Interceptor initialized"
        );
        Self { config, blocked }
    }

    pub fn intercept(&self, request: &StatementRequest) -> Verdict {
        match self.check(request.sql()) {
            Ok(classification) => Verdict::Allow(classification),
            Err(reason) => {
                warn!(
                    context = %request.context(),
                    reason = %reason,
                    statement = %preview(request.sql()),
                    "Statement denied"
                );
                metrics::record_denial();
                Verdict::Deny(reason)
            }
        }
    }

    fn check(&self, sql: &str) -> Result<Classification, DenyReason> {
        let security = &self.config.security;

        if sql.trim().is_empty() {
            return Err(DenyReason::EmptyStatement);
        }

        let length = sql.chars().count();
        if length > security.max_sql_length {
            return Err(DenyReason::StatementTooLong {
                length,
                max: security.max_sql_length,
            });
        }

        if let Some(pattern) = self.blocked.first_match(sql) {
            return Err(DenyReason::BlockedPatternMatched {
                pattern: pattern.to_string(),
            });
        }

        let classification = classify(sql);
        match evaluate(&classification, security) {
            Decision::Allow => Ok(classification),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// Bounded preview of a statement for logs
fn preview(sql: &str) -> String {
    let mut chars = sql.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
