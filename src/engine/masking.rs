// SPDX-License-Identifier: Apache-2.0

//! Sensitive Field Masker
//!
//! Redacts values by *name*: a column whose name contains a sensitive
//! keyword, or the value of a name/value row (`SHOW VARIABLES`,
//! `SHOW STATUS`) whose variable name does. Values themselves are never
//! inspected.

use sqlgate_core::{Row, SecurityConfig, Value};

pub const REDACTION_MARKER: &str = "*** HIDDEN ***";

const DEFAULT_SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "auth",
    "credential",
    "key",
    "secret",
    "private",
    "ssl",
    "tls",
    "cipher",
    "certificate",
    "host",
    "path",
    "directory",
];

/// Columns holding the variable name of a name/value row
const VARIABLE_NAME_COLUMNS: &[&str] = &["Variable_name", "variable_name", "VARIABLE_NAME", "name"];
/// Columns holding the variable value of a name/value row
const VARIABLE_VALUE_COLUMNS: &[&str] = &["Value", "value", "VARIABLE_VALUE", "variable_value"];

#[derive(Debug, Clone)]
pub struct Masker {
    /// Lower-cased keywords
    keywords: Vec<String>,
    enabled: bool,
}

impl Masker {
    pub fn new(security: &SecurityConfig) -> Self {
        let mut keywords: Vec<String> = DEFAULT_SENSITIVE_KEYWORDS
            .iter()
            .map(|k| k.to_string())
            .collect();
        for field in &security.sensitive_info_fields {
            let field = field.trim().to_lowercase();
            if !field.is_empty() && !keywords.contains(&field) {
                keywords.push(field);
            }
        }

        Self {
            keywords,
            enabled: !security.allow_sensitive_info,
        }
    }

    /// Case-insensitive substring test against the keyword set
    pub fn is_sensitive(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }

    pub fn mask_rows(&self, rows: &mut [Row]) {
        if !self.enabled {
            return;
        }
        for row in rows {
            self.mask_row(row);
        }
    }

    pub fn mask_row(&self, row: &mut Row) {
        if !self.enabled {
            return;
        }

        let sensitive_variable = VARIABLE_NAME_COLUMNS
            .iter()
            .filter_map(|column| row.get(column).and_then(Value::as_str))
            .any(|variable| self.is_sensitive(variable));

        for (column, value) in row.iter_mut() {
            let variable_value = sensitive_variable && VARIABLE_VALUE_COLUMNS.contains(&column);
            if variable_value || self.is_sensitive(column) {
                *value = Value::Text(REDACTION_MARKER.to_string());
            }
        }
    }
}
