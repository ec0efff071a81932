// SPDX-License-Identifier: Apache-2.0

//! Risk Policy Engine
//!
//! The tier table is fixed; only admission is configurable. Admission is a
//! set-membership test, so an operator may admit LOW and CRITICAL while
//! excluding the tiers in between.

use serde::Serialize;
use sqlgate_core::{ErrorKind, RiskTier, SecurityConfig};

use crate::analyzer::{Classification, DdlVerb, OperationKind};

/// Fixed tier table
pub fn tier_for(kind: OperationKind, has_where: bool) -> RiskTier {
    match kind {
        OperationKind::Select | OperationKind::Metadata => RiskTier::Low,
        OperationKind::Insert => RiskTier::Medium,
        OperationKind::Update | OperationKind::Delete if has_where => RiskTier::Medium,
        OperationKind::Update | OperationKind::Delete => RiskTier::Critical,
        OperationKind::Ddl(DdlVerb::Drop | DdlVerb::Truncate) => RiskTier::Critical,
        OperationKind::Ddl(_) => RiskTier::High,
        OperationKind::Other => RiskTier::High,
    }
}

/// Why a statement was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    EmptyStatement,
    StatementTooLong { length: usize, max: usize },
    BlockedPatternMatched { pattern: String },
    RiskTierNotAllowed { tier: RiskTier, operation: String },
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyStatement => "EMPTY_STATEMENT",
            Self::StatementTooLong { .. } => "STATEMENT_TOO_LONG",
            Self::BlockedPatternMatched { .. } => "BLOCKED_PATTERN_MATCHED",
            Self::RiskTierNotAllowed { .. } => "RISK_TIER_NOT_ALLOWED",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyStatement => ErrorKind::ValidationError,
            Self::StatementTooLong { .. } => ErrorKind::StatementTooLong,
            Self::BlockedPatternMatched { .. } => ErrorKind::BlockedPatternMatched,
            Self::RiskTierNotAllowed { .. } => ErrorKind::RiskTierNotAllowed,
        }
    }

    /// Caller-facing message
    pub fn message(&self) -> String {
        match self {
            Self::EmptyStatement => "SQL statement must not be empty".to_string(),
            Self::StatementTooLong { length, max } => {
                format!("SQL statement is {length} characters long, the limit is {max}")
            }
            Self::BlockedPatternMatched { pattern } => {
                format!("SQL statement matches blocked pattern '{pattern}'")
            }
            Self::RiskTierNotAllowed { tier, operation } => {
                format!("{operation} statement has risk tier {tier}, which is not allowed")
            }
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Admission check of a classified statement
///
/// Input holding several statements is admitted only when every one of
/// their tiers is; the most severe refused tier is reported.
pub fn evaluate(classification: &Classification, config: &SecurityConfig) -> Decision {
    if !config.enable_query_check {
        return Decision::Allow;
    }
    let refused = classification
        .tiers
        .iter()
        .rev()
        .find(|(tier, _)| !config.allowed_risk_levels.contains(*tier));
    match refused {
        None => Decision::Allow,
        Some((tier, keyword)) => {
            let operation = if keyword.is_empty() {
                "UNKNOWN".to_string()
            } else {
                keyword.clone()
            };
            Decision::Deny(DenyReason::RiskTierNotAllowed {
                tier: *tier,
                operation,
            })
        }
    }
}
