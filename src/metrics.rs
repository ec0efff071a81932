// SPDX-License-Identifier: Apache-2.0

//! Lightweight in-process statement metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct StatementMetrics {
    total: AtomicU64,
    failed: AtomicU64,
    denied: AtomicU64,
    acquire_timeouts: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_max_ms: AtomicU64,
}

static STATEMENT_METRICS: OnceLock<StatementMetrics> = OnceLock::new();

fn metrics() -> &'static StatementMetrics {
    STATEMENT_METRICS.get_or_init(StatementMetrics::default)
}

/// Records one executed statement (denied statements are not executed)
pub fn record_statement(duration_ms: f64, success: bool) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.total.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.failed.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .duration_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .duration_max_ms
        .fetch_max(duration_ms, Ordering::Relaxed);
}

pub fn record_denial() {
    metrics().denied.fetch_add(1, Ordering::Relaxed);
}

pub fn record_acquire_timeout() {
    metrics().acquire_timeouts.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Serialize)]
pub struct StatementMetricsSnapshot {
    pub total: u64,
    pub failed: u64,
    pub denied: u64,
    pub acquire_timeouts: u64,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<u64>,
}

pub fn snapshot() -> StatementMetricsSnapshot {
    let metrics = metrics();
    let total = metrics.total.load(Ordering::Relaxed);
    let duration_total = metrics.duration_total_ms.load(Ordering::Relaxed);
    let max_ms = metrics.duration_max_ms.load(Ordering::Relaxed);

    let avg_ms = if total > 0 {
        Some(duration_total as f64 / total as f64)
    } else {
        None
    };

    StatementMetricsSnapshot {
        total,
        failed: metrics.failed.load(Ordering::Relaxed),
        denied: metrics.denied.load(Ordering::Relaxed),
        acquire_timeouts: metrics.acquire_timeouts.load(Ordering::Relaxed),
        avg_ms,
        max_ms: (max_ms > 0).then_some(max_ms),
    }
}
