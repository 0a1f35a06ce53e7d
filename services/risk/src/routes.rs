//! Ops endpoints for the manual review queue.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{ErrorResponse, ManualReviewRequest, RiskReview};
use crate::rules::Decision;
use crate::service::{ManualDecisionError, RiskService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RiskService>,
    pub api_key: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ops/reviews", get(list_reviews))
        .route("/ops/reviews/{payment_id}/approve", post(approve_review))
        .route("/ops/reviews/{payment_id}/deny", post(deny_review))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ReviewQuery {
    #[serde(default = "default_status")]
    status: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_status() -> String {
    "PENDING".to_string()
}

fn default_limit() -> i64 {
    100
}

fn enforce_api_key(
    headers: &HeaderMap,
    expected: &str,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("unauthorized", "invalid API key")),
        ));
    }
    Ok(())
}

/// GET /ops/reviews: list review queue rows (default: pending).
async fn list_reviews(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReviewQuery>,
) -> Result<Json<Vec<RiskReview>>, (StatusCode, Json<ErrorResponse>)> {
    enforce_api_key(&headers, &state.api_key)?;

    let rows = state
        .service
        .list_reviews(&query.status.to_uppercase(), query.limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Review listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("database_error", e.to_string())),
            )
        })?;

    Ok(Json(rows))
}

/// POST /ops/reviews/{payment_id}/approve: emit `risk.approved`.
async fn approve_review(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ManualReviewRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    manual_decision(state, payment_id, headers, req, Decision::Approve).await
}

/// POST /ops/reviews/{payment_id}/deny: emit `risk.denied`.
async fn deny_review(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ManualReviewRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    manual_decision(state, payment_id, headers, req, Decision::Deny).await
}

async fn manual_decision(
    state: AppState,
    payment_id: String,
    headers: HeaderMap,
    req: ManualReviewRequest,
    decision: Decision,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    enforce_api_key(&headers, &state.api_key)?;

    if req.reviewed_by.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "validation_error",
                "reviewed_by must be non-empty",
            )),
        ));
    }

    let trace_id = headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match state
        .service
        .manual_decision(&payment_id, decision, &req.reviewed_by, &trace_id)
        .await
    {
        Ok(review) => Ok(Json(serde_json::json!({
            "payment_id": review.payment_id,
            "status": review.status,
            "reviewed_by": review.reviewed_by,
        }))),
        Err(e) => Err(decision_error(e)),
    }
}

/// Map service validation errors to HTTP status codes.
fn decision_error(error: ManualDecisionError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        ManualDecisionError::NotFound | ManualDecisionError::PaymentNotFound => {
            StatusCode::NOT_FOUND
        }
        ManualDecisionError::AlreadyFinalized(_) | ManualDecisionError::WrongPaymentState(_) => {
            StatusCode::CONFLICT
        }
        ManualDecisionError::StatusCheck(_) => StatusCode::BAD_REQUEST,
        ManualDecisionError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse::new("manual_decision_failed", error.to_string())),
    )
}

/// Health check endpoint handler
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
