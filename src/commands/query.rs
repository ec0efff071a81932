// SPDX-License-Identifier: Apache-2.0

//! Query Commands
//!
//! Free-form statements and paginated SELECTs.

use sqlgate_core::{
    EngineError, EngineResult, ExecutionContextId, Pagination, ResultEnvelope, StatementRequest,
    Value,
};
use sqlgate_drivers::Connector;
use sqlgate_sql::validate::validate_range;
use sqlgate_sql::{classify, OperationKind};
use tracing::{debug, info, warn};

use crate::Gateway;

const MAX_PAGE_SIZE: i64 = 1000;

/// Runs a caller-written statement
pub async fn query<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    sql: String,
    params: Vec<Value>,
) -> ResultEnvelope {
    let request = StatementRequest::new(sql, context.clone()).with_params(params);
    gateway.run_statement(&request).await
}

/// Runs one page of a SELECT and attaches paging details
///
/// The total comes from a second `COUNT(*)` statement; when that one fails
/// or is denied, the page is still returned without a total.
pub async fn paginate<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    sql: &str,
    page: i64,
    page_size: i64,
) -> EngineResult<ResultEnvelope> {
    let page = validate_range("page", page, 1, None)?;
    let page_size = validate_range("page_size", page_size, 1, Some(MAX_PAGE_SIZE))?;

    let base = sql.trim().trim_end_matches(';').trim_end();
    let classification = classify(base);
    if classification.kind != OperationKind::Select || classification.is_multi_statement() {
        return Err(EngineError::validation(
            "only a single SELECT statement can be paginated",
        ));
    }
    if classification.has_limit {
        return Err(EngineError::validation(
            "statement already has a LIMIT clause and cannot be paginated",
        ));
    }

    let offset = (page - 1).saturating_mul(page_size);
    debug!(page, page_size, offset, "Running paginated query");

    // On its own line so a trailing `--` comment cannot swallow the clause
    let paged_sql = format!("{base}\nLIMIT {page_size} OFFSET {offset}");
    let paged_shape = classify(&paged_sql);
    if paged_shape.is_multi_statement() || !paged_shape.has_limit {
        return Err(EngineError::validation(
            "statement cannot be paginated: the appended LIMIT clause would not apply to it",
        ));
    }

    let paged = StatementRequest::new(paged_sql, context.clone());
    let envelope = gateway.run_statement(&paged).await;
    let returned = match envelope.row_set() {
        Some(rows) => rows.len() as u64,
        None => return Ok(envelope),
    };

    let total = count_total(gateway, context, base).await;
    let pagination = Pagination::new(page as u64, page_size as u64, returned, total);
    if pagination.large_result {
        info!(
            total_records = total,
            page_size, "Large result set, consider a smaller page size"
        );
    }
    Ok(envelope.with_pagination(pagination))
}

async fn count_total<C: Connector>(
    gateway: &Gateway<C>,
    context: &ExecutionContextId,
    base: &str,
) -> Option<u64> {
    let request = StatementRequest::new(
        format!("SELECT COUNT(*) AS total FROM ({base}\n) AS paginated_subquery"),
        context.clone(),
    );
    let envelope = gateway.run_statement(&request).await;
    if let Some(error) = envelope.error() {
        warn!(kind = %error.kind, "Could not count paginated results");
        return None;
    }

    envelope
        .row_set()
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("total"))
        .and_then(Value::as_i64)
        .and_then(|total| u64::try_from(total).ok())
}
