// SPDX-License-Identifier: Apache-2.0

//! Statement classification and admission policy.

pub mod analyzer;
pub mod risk;
pub mod validate;

pub use analyzer::{classify, Classification, DdlVerb, OperationKind};
pub use risk::{evaluate, tier_for, Decision, DenyReason};
