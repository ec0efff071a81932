// SPDX-License-Identifier: Apache-2.0

//! End-to-end gateway behaviour against the in-memory backend.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sqlgate_core::{
    ErrorKind, ExecutionContextId, GatewayConfig, PoolConfig, ResultEnvelope, RiskTier, Row,
    StatementRequest, Value,
};
use sqlgate_drivers::mock::{MockConnector, MockState};
use sqlgate_drivers::{ExecutionContext, PoolEntryState};
use sqlgate_lib::{Command, Gateway};
use sqlgate_sql::classify;

const HIDDEN: &str = "*** HIDDEN ***";

fn gateway_with(edit: impl FnOnce(&mut GatewayConfig)) -> (Arc<Gateway<MockConnector>>, Arc<MockState>) {
    let mut config = GatewayConfig {
        pool: PoolConfig {
            min_size: 1,
            max_size: 2,
            acquire_timeout: Duration::from_millis(200),
            close_grace: Duration::from_millis(200),
            ..PoolConfig::default()
        },
        ..GatewayConfig::default()
    };
    edit(&mut config);

    let connector = MockConnector::new();
    let state = connector.state().clone();
    (Arc::new(Gateway::new(Arc::new(config), connector)), state)
}

fn gateway() -> (Arc<Gateway<MockConnector>>, Arc<MockState>) {
    gateway_with(|_| {})
}

fn ctx(name: &str) -> ExecutionContextId {
    ExecutionContextId::from(name)
}

async fn query(gateway: &Gateway<MockConnector>, sql: &str) -> ResultEnvelope {
    gateway
        .run_statement(&StatementRequest::new(sql, ctx("session")))
        .await
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

// ==================== Admission ====================

#[tokio::test]
async fn critical_statement_is_denied_without_touching_the_pool() {
    let (gateway, state) = gateway();

    let envelope = query(&gateway, "DELETE FROM users").await;

    assert_eq!(envelope.error_kind(), Some(ErrorKind::RiskTierNotAllowed));
    assert_eq!(state.connects.load(Ordering::SeqCst), 0);
    assert_eq!(gateway.pools().entry_count().await, 0);
    assert_eq!(
        gateway.pools().state(&ctx("session")).await,
        PoolEntryState::Uninitialized
    );
}

#[tokio::test]
async fn overlong_statement_is_denied_even_when_low_risk() {
    let (gateway, state) = gateway_with(|c| c.security.max_sql_length = 40);

    let sql = format!("SELECT * FROM users WHERE name = '{}'", "x".repeat(50));
    let envelope = query(&gateway, &sql).await;

    assert_eq!(envelope.error_kind(), Some(ErrorKind::StatementTooLong));
    assert_eq!(state.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blocked_pattern_applies_to_generated_metadata_sql() {
    let (gateway, state) = gateway_with(|c| c.security.blocked_patterns = vec!["show tables".into()]);

    let envelope = gateway
        .execute(
            Command::ShowTables {
                database: None,
                pattern: None,
                limit: 0,
                exclude_views: false,
            },
            &ctx("session"),
        )
        .await;

    assert_eq!(envelope.error_kind(), Some(ErrorKind::BlockedPatternMatched));
    assert!(state.statements().is_empty());
}

#[tokio::test]
async fn admitted_tiers_are_configurable() {
    let (gateway, state) = gateway_with(|c| {
        c.security.allowed_risk_levels = [RiskTier::Low, RiskTier::Critical].into_iter().collect()
    });
    state.script(|s| s.affected = 7);

    assert!(query(&gateway, "DELETE FROM audit_log").await.is_success());
    let denied = query(&gateway, "INSERT INTO audit_log VALUES (1)").await;
    assert_eq!(denied.error_kind(), Some(ErrorKind::RiskTierNotAllowed));
}

// ==================== Execution ====================

#[tokio::test]
async fn sensitive_columns_are_masked() {
    let (gateway, state) = gateway();
    state.script(|s| {
        s.rows = vec![Row::new()
            .with_column("id", 1)
            .with_column("user_password", "hunter2")
            .with_column("email", "a@example.com")]
    });

    let envelope = query(&gateway, "SELECT id, user_password, email FROM users").await;

    let rows = envelope.row_set().expect("row set");
    assert_eq!(rows[0].get("user_password"), Some(&text(HIDDEN)));
    assert_eq!(rows[0].get("email"), Some(&text("a@example.com")));
    assert_eq!(envelope.metadata().map(|m| m.result_count), Some(1));
}

#[tokio::test]
async fn exposure_flag_leaves_columns_untouched() {
    let (gateway, state) = gateway_with(|c| c.security.allow_sensitive_info = true);
    state.script(|s| s.rows = vec![Row::new().with_column("user_password", "hunter2")]);

    let envelope = query(&gateway, "SELECT user_password FROM users").await;

    let rows = envelope.row_set().expect("row set");
    assert_eq!(rows[0].get("user_password"), Some(&text("hunter2")));
}

#[tokio::test]
async fn update_with_where_commits_and_counts() {
    let (gateway, state) = gateway();
    state.script(|s| s.affected = 2);

    let envelope = query(&gateway, "UPDATE users SET active = 0 WHERE last_login < '2020-01-01'").await;

    assert!(envelope.is_success());
    assert_eq!(envelope.affected_rows(), Some(2));
    assert!(envelope.row_set().is_none());
    assert_eq!(state.commits.load(Ordering::SeqCst), 1);
    assert_eq!(state.rollbacks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_update_rolls_back() {
    let (gateway, state) = gateway();
    state.script(|s| s.fail_execute = Some("Lock wait timeout exceeded".into()));

    let envelope = query(&gateway, "UPDATE users SET active = 0 WHERE id = 1").await;

    assert_eq!(envelope.error_kind(), Some(ErrorKind::DbExecutionError));
    assert_eq!(envelope.affected_rows(), None);
    assert_eq!(state.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(state.commits.load(Ordering::SeqCst), 0);

    // The cleanly rolled back connection is reused
    state.script(|s| s.fail_execute = None);
    assert!(query(&gateway, "SELECT 1").await.is_success());
    assert_eq!(state.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn parameters_reach_the_backend() {
    let (gateway, state) = gateway();

    let envelope = gateway
        .execute(
            Command::Query {
                sql: "SELECT * FROM users WHERE id = ?".into(),
                params: vec![Value::Int(42)],
            },
            &ctx("session"),
        )
        .await;

    assert!(envelope.is_success());
    assert_eq!(state.params_of(0), Some(vec![Value::Int(42)]));
}

// ==================== Pools ====================

#[tokio::test]
async fn statements_from_one_context_share_an_entry() {
    let (gateway, _state) = gateway();

    query(&gateway, "SELECT 1").await;
    let first = gateway.pools().snapshot(&ctx("session")).await.expect("entry");
    query(&gateway, "SELECT 2").await;
    let second = gateway.pools().snapshot(&ctx("session")).await.expect("entry");

    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(gateway.pools().entry_count().await, 1);
}

#[tokio::test]
async fn contexts_get_separate_entries() {
    let (gateway, _state) = gateway();

    for name in ["a", "b"] {
        let request = StatementRequest::new("SELECT 1", ctx(name));
        assert!(gateway.run_statement(&request).await.is_success());
    }

    assert_eq!(gateway.pools().entry_count().await, 2);
}

#[tokio::test]
async fn saturated_pool_times_out() {
    let (gateway, state) = gateway_with(|c| {
        c.pool.max_size = 1;
        c.pool.acquire_timeout = Duration::from_millis(100);
    });
    state.script(|s| s.statement_delay = Some(Duration::from_millis(600)));

    let busy = {
        let gateway = gateway.clone();
        tokio::spawn(async move { query(&gateway, "SELECT SLEEP(1)").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let envelope = query(&gateway, "SELECT 1").await;
    assert_eq!(envelope.error_kind(), Some(ErrorKind::PoolAcquireTimeout));

    assert!(busy.await.expect("busy task").is_success());
}

#[tokio::test]
async fn ending_a_context_closes_its_pool() {
    let (gateway, state) = gateway();
    let context = ExecutionContext::with_id(ctx("session"));
    let watcher = gateway.watch_context(&context);

    query(&gateway, "SELECT 1").await;
    assert_eq!(gateway.pools().entry_count().await, 1);

    context.end();
    watcher.await.expect("watcher");

    assert_eq!(gateway.pools().entry_count().await, 0);
    assert_eq!(state.open_connections(), 0);
    assert_eq!(
        gateway.pools().state(&ctx("session")).await,
        PoolEntryState::Recycled
    );
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let (gateway, state) = gateway();
    for name in ["a", "b", "c"] {
        gateway
            .run_statement(&StatementRequest::new("SELECT 1", ctx(name)))
            .await;
    }

    gateway.shutdown().await;

    assert_eq!(gateway.pools().entry_count().await, 0);
    assert_eq!(state.open_connections(), 0);
}

// ==================== Commands ====================

#[tokio::test]
async fn paginate_adds_limit_and_totals() {
    let (gateway, state) = gateway();
    state.script(|s| {
        s.rows = (0..10i64).map(|i| Row::new().with_column("id", i)).collect();
        s.responses = vec![(
            "COUNT(*)".into(),
            vec![Row::new().with_column("total", 120)],
        )];
    });

    let envelope = gateway
        .execute(
            Command::Paginate {
                sql: "SELECT id FROM orders;".into(),
                page: 2,
                page_size: 10,
            },
            &ctx("session"),
        )
        .await;

    let statements = state.statements();
    assert_eq!(statements[0], "SELECT id FROM orders\nLIMIT 10 OFFSET 10");
    assert_eq!(
        statements[1],
        "SELECT COUNT(*) AS total FROM (SELECT id FROM orders\n) AS paginated_subquery"
    );

    let pagination = envelope.pagination().expect("pagination");
    assert_eq!(pagination.total_records, Some(120));
    assert_eq!(pagination.total_pages, Some(12));
    assert!(pagination.has_next);
    assert!(pagination.has_previous);
    assert!(!pagination.large_result);
    assert_eq!(envelope.row_set().map(|r| r.len()), Some(10));
}

#[tokio::test]
async fn paginate_survives_a_failed_count() {
    let (gateway, state) = gateway_with(|c| c.security.blocked_patterns = vec!["count\\(".into()]);
    state.script(|s| s.rows = (0..5i64).map(|i| Row::new().with_column("id", i)).collect());

    let envelope = gateway
        .execute(
            Command::Paginate {
                sql: "SELECT id FROM orders".into(),
                page: 1,
                page_size: 5,
            },
            &ctx("session"),
        )
        .await;

    let pagination = envelope.pagination().expect("pagination");
    assert_eq!(pagination.total_records, None);
    assert!(pagination.has_next);
    assert!(!pagination.has_previous);
}

#[tokio::test]
async fn paginate_keeps_limit_after_trailing_comment() {
    let (gateway, state) = gateway();
    state.script(|s| s.rows = (0..3i64).map(|i| Row::new().with_column("id", i)).collect());

    let envelope = gateway
        .execute(
            Command::Paginate {
                sql: "SELECT id FROM orders ORDER BY id DESC -- newest first".into(),
                page: 1,
                page_size: 3,
            },
            &ctx("session"),
        )
        .await;
    assert!(envelope.is_success(), "{:?}", envelope.error());

    let statements = state.statements();
    assert!(statements[0].ends_with("-- newest first\nLIMIT 3 OFFSET 0"));
    assert!(classify(&statements[0]).has_limit);
    assert!(statements[1].ends_with("-- newest first\n) AS paginated_subquery"));
}

#[tokio::test]
async fn paginate_rejects_bad_input_before_running_anything() {
    let (gateway, state) = gateway();
    let cases = [
        ("SELECT id FROM orders", 0, 10),
        ("SELECT id FROM orders", 1, 0),
        ("SELECT id FROM orders", 1, 1001),
        ("SELECT id FROM orders LIMIT 5", 1, 10),
        ("DELETE FROM orders WHERE id = 1", 1, 10),
        ("SELECT 1; SELECT 2", 1, 10),
        ("SELECT id FROM orders; -- x", 1, 10),
    ];

    for (sql, page, page_size) in cases {
        let envelope = gateway
            .execute(
                Command::Paginate {
                    sql: sql.into(),
                    page,
                    page_size,
                },
                &ctx("session"),
            )
            .await;
        assert_eq!(
            envelope.error_kind(),
            Some(ErrorKind::ValidationError),
            "{sql} page={page} size={page_size}"
        );
    }
    assert!(state.statements().is_empty());
}

#[tokio::test]
async fn show_databases_hides_system_schemas() {
    let (gateway, state) = gateway();
    state.script(|s| {
        s.rows = ["information_schema", "mysql", "shop", "sys", "analytics"]
            .into_iter()
            .map(|name| Row::new().with_column("Database", name))
            .collect()
    });

    let visible = gateway
        .execute(
            Command::ShowDatabases {
                pattern: None,
                limit: 0,
                include_system: false,
            },
            &ctx("session"),
        )
        .await;
    let names: Vec<_> = visible
        .row_set()
        .expect("rows")
        .iter()
        .filter_map(|row| row.get("Database").and_then(Value::as_str))
        .collect();
    assert_eq!(names, ["shop", "analytics"]);
    assert_eq!(visible.metadata().map(|m| m.result_count), Some(2));

    let all = gateway
        .execute(
            Command::ShowDatabases {
                pattern: None,
                limit: 3,
                include_system: true,
            },
            &ctx("session"),
        )
        .await;
    assert_eq!(all.row_set().map(|r| r.len()), Some(3));
}

#[tokio::test]
async fn metadata_commands_validate_names() {
    let (gateway, state) = gateway();

    let envelope = gateway
        .execute(
            Command::DescribeTable {
                table: "users; DROP TABLE users".into(),
                database: None,
            },
            &ctx("session"),
        )
        .await;
    assert_eq!(envelope.error_kind(), Some(ErrorKind::ValidationError));

    let envelope = gateway
        .execute(
            Command::ShowTables {
                database: None,
                pattern: Some("x' OR '1'='1".into()),
                limit: 0,
                exclude_views: false,
            },
            &ctx("session"),
        )
        .await;
    assert_eq!(envelope.error_kind(), Some(ErrorKind::ValidationError));

    let envelope = gateway
        .execute(
            Command::ShowTables {
                database: None,
                pattern: None,
                limit: -1,
                exclude_views: false,
            },
            &ctx("session"),
        )
        .await;
    assert_eq!(envelope.error_kind(), Some(ErrorKind::ValidationError));

    assert!(state.statements().is_empty());
}

#[tokio::test]
async fn metadata_commands_generate_quoted_sql() {
    let (gateway, state) = gateway();
    let commands = [
        Command::ShowColumns {
            table: "users".into(),
            database: Some("shop".into()),
        },
        Command::ShowCreateTable {
            table: "users".into(),
            database: None,
        },
        Command::ShowIndexes {
            table: "users".into(),
            database: None,
        },
        Command::ShowTableStatus {
            table: Some("user%".into()),
            database: Some("shop".into()),
        },
        Command::ShowVariables {
            pattern: Some("max_%".into()),
            global: true,
        },
        Command::ShowStatus {
            pattern: None,
            global: false,
        },
    ];

    for command in commands {
        assert!(gateway.execute(command, &ctx("session")).await.is_success());
    }

    assert_eq!(
        state.statements(),
        [
            "SHOW COLUMNS FROM `shop`.`users`",
            "SHOW CREATE TABLE `users`",
            "SHOW INDEX FROM `users`",
            "SHOW TABLE STATUS FROM `shop` LIKE 'user%'",
            "SHOW GLOBAL VARIABLES LIKE 'max_%'",
            "SHOW STATUS",
        ]
    );
}

#[tokio::test]
async fn show_foreign_keys_binds_schema_and_table() {
    let (gateway, state) = gateway();

    let envelope = gateway
        .execute(
            Command::ShowForeignKeys {
                table: "orders".into(),
                database: None,
            },
            &ctx("session"),
        )
        .await;

    assert!(envelope.is_success());
    assert!(state.statements()[0].contains("COALESCE(?, DATABASE())"));
    assert_eq!(state.params_of(0), Some(vec![Value::Null, text("orders")]));
}

#[tokio::test]
async fn show_variables_masks_sensitive_values() {
    let (gateway, state) = gateway();
    state.script(|s| {
        s.rows = vec![
            Row::new()
                .with_column("Variable_name", "ssl_key")
                .with_column("Value", "/etc/mysql/server-key.pem"),
            Row::new()
                .with_column("Variable_name", "max_connections")
                .with_column("Value", "151"),
        ]
    });

    let envelope = gateway
        .execute(
            Command::ShowVariables {
                pattern: None,
                global: false,
            },
            &ctx("session"),
        )
        .await;

    let rows = envelope.row_set().expect("rows");
    assert_eq!(rows[0].get("Value"), Some(&text(HIDDEN)));
    assert_eq!(rows[1].get("Value"), Some(&text("151")));
}
