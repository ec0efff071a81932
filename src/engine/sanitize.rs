// SPDX-License-Identifier: Apache-2.0

//! Error message sanitization for production responses.

use std::sync::OnceLock;

use regex::Regex;

fn rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            // Driver framing
            (r"(?i)^error (returned from|communicating with) database:\s*", ""),
            // 'user'@'host'
            (r"'[^']*'@'[^']*'", "'[redacted]'@'[redacted]'"),
            // server on 'db.internal:3306'
            (r"(?i)\b(on|host|server|to)\s+'[^']*'", "$1 '[host]'"),
            (r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?\b", "[host]"),
            // Unix and Windows paths with at least one directory
            (r#"(^|[\s'"(=`])(?:[A-Za-z]:)?[\\/](?:[\w.\-]+[\\/])+[\w.\-]*"#, "${1}[path]"),
            (r"(?i)\b(password|passwd|pwd)\s*[:=]\s*\S+", "$1=[redacted]"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("sanitizer patterns are valid"),
                replacement,
            )
        })
        .collect()
    })
}

/// Removes paths, hosts and credentials from a driver message
pub fn sanitize_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (regex, replacement) in rules() {
        sanitized = regex.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}
