// SPDX-License-Identifier: Apache-2.0

//! Input validation for SQL generated from caller-supplied names.

use std::sync::OnceLock;

use regex::Regex;
use sqlgate_core::{EngineError, EngineResult};

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex"))
}

fn like_pattern_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_%]+$").expect("static regex"))
}

/// Table, database or column name; `what` names the entity in the error
pub fn validate_identifier<'a>(name: &'a str, what: &str) -> EngineResult<&'a str> {
    if name.is_empty() {
        return Err(EngineError::validation(format!("{what} must not be empty")));
    }
    if !identifier_re().is_match(name) {
        return Err(EngineError::validation(format!(
            "invalid {what} '{name}': only letters, digits and underscores are allowed"
        )));
    }
    Ok(name)
}

/// Argument of a `LIKE` clause
pub fn validate_like_pattern(pattern: &str) -> EngineResult<&str> {
    if pattern.is_empty() {
        return Err(EngineError::validation("pattern must not be empty"));
    }
    if !like_pattern_re().is_match(pattern) {
        return Err(EngineError::validation(format!(
            "invalid pattern '{pattern}': only letters, digits, underscores and % are allowed"
        )));
    }
    Ok(pattern)
}

/// Integer argument bounded to `[min, max]`
pub fn validate_range(name: &str, value: i64, min: i64, max: Option<i64>) -> EngineResult<i64> {
    if value < min {
        return Err(EngineError::validation(format!(
            "{name} must be at least {min}, got {value}"
        )));
    }
    if let Some(max) = max {
        if value > max {
            return Err(EngineError::validation(format!(
                "{name} must be at most {max}, got {value}"
            )));
        }
    }
    Ok(value)
}

/// Backtick-quotes an already validated identifier
pub fn quote_identifier(name: &str) -> String {
    format!("`{name}`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_core::ErrorKind;

    #[test]
    fn identifiers() {
        assert_eq!(validate_identifier("user_accounts2", "table").unwrap(), "user_accounts2");
        for bad in ["", "users;", "a b", "t`", "db.tbl", "x'--"] {
            let err = validate_identifier(bad, "table").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError, "{bad}");
        }
    }

    #[test]
    fn like_patterns() {
        assert!(validate_like_pattern("user%").is_ok());
        assert!(validate_like_pattern("%_log").is_ok());
        assert!(validate_like_pattern("a' OR '1'='1").is_err());
        assert!(validate_like_pattern("").is_err());
    }

    #[test]
    fn ranges() {
        assert!(validate_range("page", 1, 1, None).is_ok());
        assert!(validate_range("page", 0, 1, None).is_err());
        assert!(validate_range("page_size", 1001, 1, Some(1000)).is_err());
        assert_eq!(validate_range("limit", 0, 0, None).unwrap(), 0);
    }
}
