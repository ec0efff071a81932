// SPDX-License-Identifier: Apache-2.0

//! Universal data types for the gateway
//!
//! These types are shared by the analyzer, the pool manager and the
//! executor, and they form the wire shape returned to the transport.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Opaque identifier of a caller-side execution context
///
/// Pools are isolated per identifier. Two requests carrying equal
/// identifiers share one pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContextId(String);

impl ExecutionContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ExecutionContextId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ExecutionContextId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conservative classification of a statement's blast radius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown risk tier '{other}'")),
        }
    }
}

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Array(Vec<Value>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// One result row, keeping the column order the database returned
///
/// Serializes as a JSON object whose keys follow that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    /// Appends a column, replacing the value of an existing column of the same name
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.columns.iter_mut().map(|(n, v)| (n.as_str(), v))
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A statement as handed over by the transport
#[derive(Debug, Clone)]
pub struct StatementRequest {
    sql: String,
    params: Vec<Value>,
    context: ExecutionContextId,
}

impl StatementRequest {
    pub fn new(sql: impl Into<String>, context: ExecutionContextId) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            context,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn context(&self) -> &ExecutionContextId {
        &self.context
    }
}

/// Paging details attached to a paginated row set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
    /// Absent when the count query failed
    pub total_records: Option<u64>,
    pub total_pages: Option<u64>,
    pub has_next: bool,
    pub has_previous: bool,
    pub large_result: bool,
}

impl Pagination {
    /// Row count above which a result set is flagged as large
    pub const LARGE_RESULT_THRESHOLD: u64 = 1000;

    pub fn new(page: u64, page_size: u64, returned: u64, total_records: Option<u64>) -> Self {
        let total_pages = total_records.map(|total| total.div_ceil(page_size.max(1)));
        let has_next = match total_pages {
            Some(pages) => page < pages,
            None => returned == page_size,
        };
        Self {
            page,
            page_size,
            total_records,
            total_pages,
            has_next,
            has_previous: page > 1,
            large_result: total_records.is_some_and(|t| t > Self::LARGE_RESULT_THRESHOLD),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeMetadata {
    pub operation: String,
    pub result_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Uniform result returned for every call
///
/// Built only through [`ResultEnvelope::rows`], [`ResultEnvelope::affected`]
/// and [`ResultEnvelope::failure`], so a successful envelope always carries
/// exactly one of a row set or an affected-row count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    affected_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<EnvelopeMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<EnvelopeError>,
}

impl ResultEnvelope {
    pub fn rows(operation: impl Into<String>, rows: Vec<Row>) -> Self {
        let result_count = rows.len() as u64;
        Self {
            success: true,
            rows: Some(rows),
            affected_rows: None,
            metadata: Some(EnvelopeMetadata {
                operation: operation.into(),
                result_count,
            }),
            pagination: None,
            error: None,
        }
    }

    pub fn affected(operation: impl Into<String>, affected_rows: u64) -> Self {
        Self {
            success: true,
            rows: None,
            affected_rows: Some(affected_rows),
            metadata: Some(EnvelopeMetadata {
                operation: operation.into(),
                result_count: affected_rows,
            }),
            pagination: None,
            error: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            rows: None,
            affected_rows: None,
            metadata: None,
            pagination: None,
            error: Some(EnvelopeError {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Attaches paging details; ignored on anything but a row set
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        if self.rows.is_some() {
            self.pagination = Some(pagination);
        }
        self
    }

    /// Rewrites the row set of a row envelope and recounts its metadata
    pub fn map_rows(self, f: impl FnOnce(Vec<Row>) -> Vec<Row>) -> Self {
        match self.rows {
            Some(rows) => {
                let operation = self.metadata.map(|m| m.operation).unwrap_or_default();
                let mut mapped = Self::rows(operation, f(rows));
                mapped.pagination = self.pagination;
                mapped
            }
            None => self,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn row_set(&self) -> Option<&[Row]> {
        self.rows.as_deref()
    }

    pub fn affected_rows(&self) -> Option<u64> {
        self.affected_rows
    }

    pub fn metadata(&self) -> Option<&EnvelopeMetadata> {
        self.metadata.as_ref()
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    pub fn error(&self) -> Option<&EnvelopeError> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
