// SPDX-License-Identifier: Apache-2.0

//! Blocked pattern matching
//!
//! Each configured pattern is tried as a case-insensitive regex and as a
//! case-insensitive substring. A pattern that is not a valid regex (e.g.
//! `sleep(`) still blocks as a plain substring.

use regex::Regex;
use tracing::debug;

struct BlockedPattern {
    source: String,
    lowered: String,
    regex: Option<Regex>,
}

impl BlockedPattern {
    fn compile(source: &str) -> Self {
        let regex = match Regex::new(&format!("(?i){}", source)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                debug!("Blocked pattern '{}' is not a regex, matching as text: {}", source, e);
                None
            }
        };
        Self {
            source: source.to_string(),
            lowered: source.to_lowercase(),
            regex,
        }
    }

    fn matches(&self, sql: &str, lowered_sql: &str) -> bool {
        lowered_sql.contains(&self.lowered) || self.regex.as_ref().is_some_and(|r| r.is_match(sql))
    }
}

/// Patterns compiled once from the configuration
#[derive(Default)]
pub struct BlockedPatterns {
    patterns: Vec<BlockedPattern>,
}

impl BlockedPatterns {
    pub fn new<S: AsRef<str>>(sources: &[S]) -> Self {
        let patterns = sources
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .map(BlockedPattern::compile)
            .collect();
        Self { patterns }
    }

    /// Returns the first configured pattern the statement matches
    pub fn first_match(&self, sql: &str) -> Option<&str> {
        if self.patterns.is_empty() {
            return None;
        }
        let lowered = sql.to_lowercase();
        self.patterns
            .iter()
            .find(|p| p.matches(sql, &lowered))
            .map(|p| p.source.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
