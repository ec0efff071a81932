// SPDX-License-Identifier: Apache-2.0

//! Line-delimited JSON transport over stdio.
//!
//! Each input line is either an invocation
//! `{"id": 1, "context": "session-a", "call": {"operation": "query", "sql": "..."}}`
//! or `{"end_context": "session-a"}`. Every invocation runs on its own task and
//! produces exactly one output line carrying its `id`.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlgate_core::{ErrorKind, ExecutionContextId, GatewayConfig, ResultEnvelope};
use sqlgate_drivers::{ExecutionContext, MySqlConnector};
use sqlgate_lib::{metrics, observability, Command, MySqlGateway};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DEFAULT_CONTEXT: &str = "default";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    EndContext {
        end_context: String,
    },
    Invocation {
        #[serde(default)]
        id: serde_json::Value,
        context: Option<String>,
        call: Command,
    },
}

#[derive(Serialize)]
struct Outbound {
    id: serde_json::Value,
    #[serde(flatten)]
    envelope: ResultEnvelope,
}

#[derive(Serialize)]
struct ContextEnded {
    end_context: String,
    known: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let _log_guard = observability::init_tracing();

    let config = match GatewayConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            eprintln!("sqlgate: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let connector = MySqlConnector::new(config.database.clone());
    let gateway = Arc::new(MySqlGateway::new(config, connector));
    let sweeper = gateway.start_sweeper();

    let (tx, rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(write_lines(rx));

    let mut contexts: HashMap<ExecutionContextId, ExecutionContext> = HashMap::new();
    let mut in_flight = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read from stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        // Contexts whose pool was torn down get a fresh handle on next use
        contexts.retain(|_, ctx| !ctx.is_ended());

        match serde_json::from_str::<Inbound>(&line) {
            Ok(Inbound::EndContext { end_context }) => {
                let id = ExecutionContextId::from(end_context.clone());
                let known = match contexts.remove(&id) {
                    Some(ctx) => {
                        ctx.end();
                        true
                    }
                    None => false,
                };
                debug!(context = %id, known, "Context ended by caller");
                send(&tx, &ContextEnded { end_context, known }).await;
            }
            Ok(Inbound::Invocation { id, context, call }) => {
                let context_id =
                    ExecutionContextId::from(context.unwrap_or_else(|| DEFAULT_CONTEXT.to_string()));
                if !contexts.contains_key(&context_id) {
                    let ctx = ExecutionContext::with_id(context_id.clone());
                    gateway.watch_context(&ctx);
                    contexts.insert(context_id.clone(), ctx);
                }

                let gateway = gateway.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let envelope = gateway.execute(call, &context_id).await;
                    send(&tx, &Outbound { id, envelope }).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Malformed invocation");
                let envelope = ResultEnvelope::failure(
                    ErrorKind::ValidationError,
                    format!("malformed invocation: {e}"),
                );
                send(
                    &tx,
                    &Outbound {
                        id: serde_json::Value::Null,
                        envelope,
                    },
                )
                .await;
            }
        }

        // Reap finished tasks so the set does not grow unbounded
        while let Some(done) = in_flight.try_join_next() {
            if let Err(e) = done {
                error!(error = %e, "Invocation task failed");
            }
        }
    }

    info!("Input closed, draining in-flight invocations");
    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            error!(error = %e, "Invocation task failed");
        }
    }

    drop(tx);
    if let Err(e) = writer.await {
        error!(error = %e, "Writer task failed");
    }

    sweeper.shutdown().await;
    gateway.shutdown().await;
    info!(metrics = ?metrics::snapshot(), "sqlgate stopped");
    ExitCode::SUCCESS
}

async fn send<T: Serialize>(tx: &mpsc::Sender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => {
            if tx.send(line).await.is_err() {
                warn!("Response dropped, writer is gone");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize response"),
    }
}

async fn write_lines(mut rx: mpsc::Receiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        }
        .await;
        if let Err(e) = written {
            error!(error = %e, "Failed to write response");
            break;
        }
    }
}
