// SPDX-License-Identifier: Apache-2.0

//! Statement interceptor
//!
//! Every statement, including the SQL generated by the metadata commands,
//! passes through here before a connection is acquired.

pub mod patterns;
pub mod pipeline;

pub use patterns::BlockedPatterns;
pub use pipeline::{Interceptor, Verdict};
