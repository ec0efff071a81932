// SPDX-License-Identifier: Apache-2.0

// Execution engine
// Runs admitted statements and shapes their results

pub mod executor;
pub mod masking;
pub mod sanitize;

pub use executor::TransactionExecutor;
pub use masking::{Masker, REDACTION_MARKER};
pub use sanitize::sanitize_message;
