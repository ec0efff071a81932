// SPDX-License-Identifier: Apache-2.0

//! Metadata Commands
//!
//! Schema and server introspection. Names and patterns are validated before
//! they are spliced into SQL; values that can be bound are bound.

use sqlgate_core::{EngineResult, ExecutionContextId, ResultEnvelope, Row, StatementRequest, Value};
use sqlgate_drivers::Connector;
use sqlgate_sql::validate::{
    quote_identifier, validate_identifier, validate_like_pattern, validate_range,
};

use crate::Gateway;

const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

const FOREIGN_KEYS_SQL: &str = "SELECT kcu.CONSTRAINT_NAME, kcu.TABLE_NAME, kcu.COLUMN_NAME, \
     kcu.REFERENCED_TABLE_NAME, kcu.REFERENCED_COLUMN_NAME, rc.UPDATE_RULE, rc.DELETE_RULE \
     FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
     JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
     ON kcu.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA AND kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
     WHERE kcu.TABLE_SCHEMA = COALESCE(?, DATABASE()) AND kcu.TABLE_NAME = ? \
     AND kcu.REFERENCED_TABLE_NAME IS NOT NULL \
     ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION";

/// `` `db`.`table` `` or `` `table` ``, validated
fn table_ref(table: &str, database: Option<&str>) -> EngineResult<String> {
    let table = quote_identifier(validate_identifier(table, "table name")?);
    match database {
        Some(db) => Ok(format!(
            "{}.{}",
            quote_identifier(validate_identifier(db, "database name")?),
            table
        )),
        None => Ok(table),
    }
}

fn like_clause(pattern: Option<&str>) -> EngineResult<String> {
    match pattern {
        Some(p) => Ok(format!(" LIKE '{}'", validate_like_pattern(p)?)),
        None => Ok(String::new()),
    }
}

fn truncate(rows: Vec<Row>, limit: i64) -> Vec<Row> {
    match usize::try_from(limit) {
        Ok(limit) if limit > 0 => rows.into_iter().take(limit).collect(),
        _ => rows,
    }
}

async fn run<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    sql: String,
) -> ResultEnvelope {
    gateway
        .run_statement(&StatementRequest::new(sql, context.clone()))
        .await
}

pub async fn show_tables<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    database: Option<&str>,
    pattern: Option<&str>,
    limit: i64,
    exclude_views: bool,
) -> EngineResult<ResultEnvelope> {
    let limit = validate_range("limit", limit, 0, None)?;
    let mut sql = String::from(if exclude_views { "SHOW FULL TABLES" } else { "SHOW TABLES" });
    if let Some(db) = database {
        sql.push_str(" FROM ");
        sql.push_str(&quote_identifier(validate_identifier(db, "database name")?));
    }
    sql.push_str(&like_clause(pattern)?);

    let envelope = run(gateway, context, sql).await;
    Ok(envelope.map_rows(|rows| {
        let rows = if exclude_views {
            rows.into_iter()
                .filter(|row| {
                    row.get("Table_type")
                        .and_then(Value::as_str)
                        .map_or(true, |kind| kind == "BASE TABLE")
                })
                .collect()
        } else {
            rows
        };
        truncate(rows, limit)
    }))
}

pub async fn show_columns<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    table: &str,
    database: Option<&str>,
) -> EngineResult<ResultEnvelope> {
    let sql = format!("SHOW COLUMNS FROM {}", table_ref(table, database)?);
    Ok(run(gateway, context, sql).await)
}

pub async fn describe_table<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    table: &str,
    database: Option<&str>,
) -> EngineResult<ResultEnvelope> {
    let sql = format!("DESCRIBE {}", table_ref(table, database)?);
    Ok(run(gateway, context, sql).await)
}

pub async fn show_create_table<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    table: &str,
    database: Option<&str>,
) -> EngineResult<ResultEnvelope> {
    let sql = format!("SHOW CREATE TABLE {}", table_ref(table, database)?);
    Ok(run(gateway, context, sql).await)
}

pub async fn show_indexes<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    table: &str,
    database: Option<&str>,
) -> EngineResult<ResultEnvelope> {
    let sql = format!("SHOW INDEX FROM {}", table_ref(table, database)?);
    Ok(run(gateway, context, sql).await)
}

/// Foreign keys of a table; the schema defaults to the connection's database
pub async fn show_foreign_keys<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    table: &str,
    database: Option<&str>,
) -> EngineResult<ResultEnvelope> {
    let table = validate_identifier(table, "table name")?;
    let schema = match database {
        Some(db) => Value::from(validate_identifier(db, "database name")?),
        None => Value::Null,
    };

    let request = StatementRequest::new(FOREIGN_KEYS_SQL, context.clone())
        .with_params(vec![schema, Value::from(table)]);
    Ok(gateway.run_statement(&request).await)
}

pub async fn show_databases<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    pattern: Option<&str>,
    limit: i64,
    include_system: bool,
) -> EngineResult<ResultEnvelope> {
    let limit = validate_range("limit", limit, 0, None)?;
    let sql = format!("SHOW DATABASES{}", like_clause(pattern)?);

    let envelope = run(gateway, context, sql).await;
    Ok(envelope.map_rows(|rows| {
        let rows = if include_system {
            rows
        } else {
            rows.into_iter().filter(|row| !is_system_database(row)).collect()
        };
        truncate(rows, limit)
    }))
}

/// `SHOW DATABASES` names its column `Database`, or `Database (pattern)` with LIKE
fn is_system_database(row: &Row) -> bool {
    row.iter()
        .find(|(column, _)| column.to_ascii_lowercase().starts_with("database"))
        .and_then(|(_, value)| value.as_str())
        .is_some_and(|name| SYSTEM_DATABASES.contains(&name.to_ascii_lowercase().as_str()))
}

pub async fn show_variables<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    pattern: Option<&str>,
    global: bool,
) -> EngineResult<ResultEnvelope> {
    let scope = if global { "GLOBAL " } else { "" };
    let sql = format!("SHOW {scope}VARIABLES{}", like_clause(pattern)?);
    Ok(run(gateway, context, sql).await)
}

pub async fn show_status<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    pattern: Option<&str>,
    global: bool,
) -> EngineResult<ResultEnvelope> {
    let scope = if global { "GLOBAL " } else { "" };
    let sql = format!("SHOW {scope}STATUS{}", like_clause(pattern)?);
    Ok(run(gateway, context, sql).await)
}

/// Table status for one table (a LIKE pattern) or for the whole database
pub async fn show_table_status<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    table: Option<&str>,
    database: Option<&str>,
) -> EngineResult<ResultEnvelope> {
    let mut sql = String::from("SHOW TABLE STATUS");
    if let Some(db) = database {
        sql.push_str(" FROM ");
        sql.push_str(&quote_identifier(validate_identifier(db, "database name")?));
    }
    sql.push_str(&like_clause(table)?);
    Ok(run(gateway, context, sql).await)
}
