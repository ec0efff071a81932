// SPDX-License-Identifier: Apache-2.0

//! Command table
//!
//! Every callable operation is a variant of [`Command`]; dispatch is a plain
//! `match`. Each handler builds SQL and runs it through the gateway, so the
//! interceptor sees generated statements exactly like caller-written ones.

pub mod metadata;
pub mod query;

use serde::Deserialize;
use sqlgate_core::{EngineResult, ExecutionContextId, ResultEnvelope, Value};
use sqlgate_drivers::Connector;

use crate::Gateway;

fn default_limit() -> i64 {
    100
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

/// One invocation from the transport
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Command {
    Query {
        sql: String,
        #[serde(default)]
        params: Vec<Value>,
    },
    ShowTables {
        database: Option<String>,
        pattern: Option<String>,
        #[serde(default = "default_limit")]
        limit: i64,
        #[serde(default)]
        exclude_views: bool,
    },
    ShowColumns {
        table: String,
        database: Option<String>,
    },
    DescribeTable {
        table: String,
        database: Option<String>,
    },
    ShowCreateTable {
        table: String,
        database: Option<String>,
    },
    ShowIndexes {
        table: String,
        database: Option<String>,
    },
    ShowForeignKeys {
        table: String,
        database: Option<String>,
    },
    ShowDatabases {
        pattern: Option<String>,
        #[serde(default = "default_limit")]
        limit: i64,
        #[serde(default)]
        include_system: bool,
    },
    ShowVariables {
        pattern: Option<String>,
        #[serde(default)]
        global: bool,
    },
    ShowStatus {
        pattern: Option<String>,
        #[serde(default)]
        global: bool,
    },
    ShowTableStatus {
        table: Option<String>,
        database: Option<String>,
    },
    Paginate {
        sql: String,
        #[serde(default = "default_page")]
        page: i64,
        #[serde(default = "default_page_size")]
        page_size: i64,
    },
}

impl Command {
    /// Operation names accepted on the wire
    pub const NAMES: &'static [&'static str] = &[
        "query",
        "show_tables",
        "show_columns",
        "describe_table",
        "show_create_table",
        "show_indexes",
        "show_foreign_keys",
        "show_databases",
        "show_variables",
        "show_status",
        "show_table_status",
        "paginate",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::ShowTables { .. } => "show_tables",
            Self::ShowColumns { .. } => "show_columns",
            Self::DescribeTable { .. } => "describe_table",
            Self::ShowCreateTable { .. } => "show_create_table",
            Self::ShowIndexes { .. } => "show_indexes",
            Self::ShowForeignKeys { .. } => "show_foreign_keys",
            Self::ShowDatabases { .. } => "show_databases",
            Self::ShowVariables { .. } => "show_variables",
            Self::ShowStatus { .. } => "show_status",
            Self::ShowTableStatus { .. } => "show_table_status",
            Self::Paginate { .. } => "paginate",
        }
    }

    /// Runs the command under `context`; failures come back as envelopes
    pub async fn dispatch<C: Connector>(
        self,
        gateway: &Gateway<C>,
        context: &ExecutionContextId,
    ) -> ResultEnvelope {
        let outcome: EngineResult<ResultEnvelope> = match self {
            Self::Query { sql, params } => Ok(query::query(gateway, context, sql, params).await),
            Self::ShowTables {
                database,
                pattern,
                limit,
                exclude_views,
            } => {
                metadata::show_tables(
                    gateway,
                    context,
                    database.as_deref(),
                    pattern.as_deref(),
                    limit,
                    exclude_views,
                )
                .await
            }
            Self::ShowColumns { table, database } => {
                metadata::show_columns(gateway, context, &table, database.as_deref()).await
            }
            Self::DescribeTable { table, database } => {
                metadata::describe_table(gateway, context, &table, database.as_deref()).await
            }
            Self::ShowCreateTable { table, database } => {
                metadata::show_create_table(gateway, context, &table, database.as_deref()).await
            }
            Self::ShowIndexes { table, database } => {
                metadata::show_indexes(gateway, context, &table, database.as_deref()).await
            }
            Self::ShowForeignKeys { table, database } => {
                metadata::show_foreign_keys(gateway, context, &table, database.as_deref()).await
            }
            Self::ShowDatabases {
                pattern,
                limit,
                include_system,
            } => {
                metadata::show_databases(gateway, context, pattern.as_deref(), limit, include_system)
                    .await
            }
            Self::ShowVariables { pattern, global } => {
                metadata::show_variables(gateway, context, pattern.as_deref(), global).await
            }
            Self::ShowStatus { pattern, global } => {
                metadata::show_status(gateway, context, pattern.as_deref(), global).await
            }
            Self::ShowTableStatus { table, database } => {
                metadata::show_table_status(gateway, context, table.as_deref(), database.as_deref())
                    .await
            }
            Self::Paginate {
                sql,
                page,
                page_size,
            } => query::paginate(gateway, context, &sql, page, page_size).await,
        };

        outcome.unwrap_or_else(|e| gateway.failure(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operations_with_defaults() {
        let cmd: Command = serde_json::from_str(r#"{"operation":"show_tables"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::ShowTables {
                database: None,
                pattern: None,
                limit: 100,
                exclude_views: false,
            }
        );

        let cmd: Command =
            serde_json::from_str(r#"{"operation":"query","sql":"SELECT ?","params":[1,"a"]}"#)
                .unwrap();
        assert_eq!(
            cmd,
            Command::Query {
                sql: "SELECT ?".into(),
                params: vec![Value::Int(1), Value::Text("a".into())],
            }
        );

        let cmd: Command =
            serde_json::from_str(r#"{"operation":"paginate","sql":"SELECT 1"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Paginate {
                sql: "SELECT 1".into(),
                page: 1,
                page_size: 50,
            }
        );
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"operation":"drop_everything"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"operation":"show_columns"}"#).is_err());
    }

    #[test]
    fn names_table_matches_variants() {
        for name in Command::NAMES {
            let json = match *name {
                "query" | "paginate" => format!(r#"{{"operation":"{name}","sql":"SELECT 1"}}"#),
                "show_columns" | "describe_table" | "show_create_table" | "show_indexes"
                | "show_foreign_keys" => format!(r#"{{"operation":"{name}","table":"t"}}"#),
                _ => format!(r#"{{"operation":"{name}"}}"#),
            };
            let cmd: Command = serde_json::from_str(&json).unwrap();
            assert_eq!(cmd.name(), *name);
        }
    }
}
