// SPDX-License-Identifier: Apache-2.0

//! MySQL Backend
//!
//! Implements the connection traits for MySQL/MariaDB using SQLx. Statements
//! without parameters go over the text protocol so every statement type
//! (SHOW, DDL, ...) works; parameterized ones are prepared.

use async_trait::async_trait;
use sqlgate_core::{DatabaseConfig, EngineError, EngineResult, Row, Value};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, Executor, Row as _};
use tokio::time::timeout;
use tracing::debug;

use crate::traits::{Connector, DbConnection};

/// Opens connections to the configured MySQL endpoint
pub struct MySqlConnector {
    config: DatabaseConfig,
}

impl MySqlConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(self.config.password.expose())
            .charset("utf8mb4")
            // Statement text is logged only by the interceptor
            .disable_statement_logging();

        match &self.config.database {
            Some(database) => options.database(database),
            None => options,
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Conn = MySqlConn;

    fn driver_id(&self) -> &'static str {
        "mysql"
    }

    async fn connect(&self) -> EngineResult<MySqlConn> {
        let options = self.options();
        match timeout(self.config.connect_timeout, MySqlConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => {
                debug!(host = %self.config.host, port = self.config.port, "MySQL connection opened");
                Ok(MySqlConn { conn })
            }
            Ok(Err(e)) => Err(EngineError::connection_failed(e.to_string())),
            Err(_) => Err(EngineError::connection_failed(format!(
                "connect timed out after {}s",
                self.config.connect_timeout.as_secs_f64()
            ))),
        }
    }
}

pub struct MySqlConn {
    conn: MySqlConnection,
}

fn map_error(error: sqlx::Error) -> EngineError {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            EngineError::connection_lost(error.to_string())
        }
        other => EngineError::execution_error(other.to_string()),
    }
}

fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
            Value::Array(_) | Value::Json(_) => {
                query.bind(serde_json::to_string(param).unwrap_or_default())
            }
        };
    }
    query
}

fn convert_row(mysql_row: &MySqlRow) -> Row {
    let mut row = Row::new();
    for column in mysql_row.columns() {
        row.push(column.name(), extract_value(mysql_row, column.ordinal()));
    }
    row
}

/// Text-like binary columns (common in SHOW output) come back as text
fn bytes_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::Text(text),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

fn extract_value(row: &MySqlRow, idx: usize) -> Value {
    // Unsigned first so BIGINT UNSIGNED is not misread
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map_or(Value::Null, |u| match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Text(u.to_string()),
        });
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map_or(Value::Null, Value::Int);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map_or(Value::Null, |i| Value::Int(i.into()));
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
        return v.map_or(Value::Null, |u| Value::Int(u.into()));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map_or(Value::Null, |i| Value::Int(i.into()));
    }
    if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
        return v.map_or(Value::Null, |u| Value::Int(u.into()));
    }
    if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
        return v.map_or(Value::Null, |i| Value::Int(i.into()));
    }
    if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
        return v.map_or(Value::Null, |u| Value::Int(u.into()));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map_or(Value::Null, Value::Bool);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map_or(Value::Null, Value::Float);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map_or(Value::Null, |f| Value::Float(f.into()));
    }
    if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
        return v.map_or(Value::Null, |d| Value::Text(d.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map_or(Value::Null, Value::Text);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map_or(Value::Null, |dt| Value::Text(dt.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v.map_or(Value::Null, |dt| {
            Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
        });
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v.map_or(Value::Null, |d| Value::Text(d.format("%Y-%m-%d").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return v.map_or(Value::Null, |t| Value::Text(t.format("%H:%M:%S").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.map_or(Value::Null, Value::Json);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map_or(Value::Null, bytes_value);
    }

    Value::Null
}

#[async_trait]
impl DbConnection for MySqlConn {
    async fn fetch(&mut self, sql: &str, params: &[Value]) -> EngineResult<Vec<Row>> {
        let rows: Vec<MySqlRow> = if params.is_empty() {
            (&mut self.conn).fetch_all(sql).await
        } else {
            bind_params(sqlx::query(sql), params)
                .fetch_all(&mut self.conn)
                .await
        }
        .map_err(map_error)?;

        Ok(rows.iter().map(convert_row).collect())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> EngineResult<u64> {
        let result = if params.is_empty() {
            (&mut self.conn).execute(sql).await
        } else {
            bind_params(sqlx::query(sql), params)
                .execute(&mut self.conn)
                .await
        }
        .map_err(map_error)?;

        Ok(result.rows_affected())
    }

    async fn begin(&mut self) -> EngineResult<()> {
        (&mut self.conn)
            .execute("START TRANSACTION")
            .await
            .map(|_| ())
            .map_err(|e| EngineError::transaction_error(e.to_string()))
    }

    async fn commit(&mut self) -> EngineResult<()> {
        (&mut self.conn)
            .execute("COMMIT")
            .await
            .map(|_| ())
            .map_err(|e| EngineError::transaction_error(e.to_string()))
    }

    async fn rollback(&mut self) -> EngineResult<()> {
        (&mut self.conn)
            .execute("ROLLBACK")
            .await
            .map(|_| ())
            .map_err(|e| EngineError::transaction_error(e.to_string()))
    }

    async fn close(self) -> EngineResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))
    }
}
