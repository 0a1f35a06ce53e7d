//! Reconciliation endpoints over posted ledger entries.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;

use crate::models::{LedgerEntry, TransactionSums};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/reconciliation", get(reconciliation_report))
        .route("/reconciliation/{transaction_id}", get(reconciliation))
        .with_state(state)
}

/// GET /reconciliation/{transaction_id}: debit/credit details for one
/// transaction.
async fn reconciliation(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT entry_id, transaction_id, account_id, direction, amount_cents, created_at
        FROM ledger_entries
        WHERE transaction_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(&transaction_id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let debits: i64 = entries
        .iter()
        .filter(|e| e.direction == "DEBIT")
        .map(|e| e.amount_cents)
        .sum();
    let credits: i64 = entries
        .iter()
        .filter(|e| e.direction == "CREDIT")
        .map(|e| e.amount_cents)
        .sum();

    Ok(Json(serde_json::json!({
        "transaction_id": transaction_id,
        "balanced": debits == credits,
        "debits": debits,
        "credits": credits,
        "entries": entries,
    })))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    1000
}

/// GET /reconciliation: global summary; the imbalanced list is always
/// empty under correct operation.
async fn reconciliation_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let rows = sqlx::query_as::<_, TransactionSums>(
        r#"
        SELECT transaction_id,
               COALESCE(SUM(CASE WHEN direction = 'DEBIT' THEN amount_cents ELSE 0 END), 0)::BIGINT AS debits,
               COALESCE(SUM(CASE WHEN direction = 'CREDIT' THEN amount_cents ELSE 0 END), 0)::BIGINT AS credits,
               COUNT(entry_id) AS entry_count
        FROM ledger_entries
        GROUP BY transaction_id
        ORDER BY transaction_id
        LIMIT $1
        "#,
    )
    .bind(query.limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let imbalanced: Vec<&TransactionSums> =
        rows.iter().filter(|r| r.debits != r.credits).collect();

    Ok(Json(serde_json::json!({
        "transactions_checked": rows.len(),
        "imbalanced_count": imbalanced.len(),
        "imbalanced_transactions": imbalanced,
    })))
}

fn internal_error(e: sqlx::Error) -> (StatusCode, String) {
    tracing::error!(error = %e, "Reconciliation query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Health check endpoint handler
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
