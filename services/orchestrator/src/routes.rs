//! HTTP surface for orchestrator-owned payment records.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{ErrorResponse, PaymentCreateRequest, PaymentResponse};
use crate::service::OrchestratorService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrchestratorService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/internal/payments", post(create_payment))
        .route("/payments/{payment_id}", get(get_payment))
        .with_state(state)
}

/// POST /internal/payments: create a payment in CREATED and emit
/// `payments.requested`. Idempotent on `idempotency_key`.
async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PaymentCreateRequest>,
) -> Result<Json<PaymentResponse>, (StatusCode, Json<ErrorResponse>)> {
    let trace_id = headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(message) = req.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("validation_error", message)),
        ));
    }

    telemetry::PAYMENT_REQUESTS_TOTAL
        .with_label_values(&[state.service.service_name()])
        .inc();
    let timer = telemetry::PAYMENT_LATENCY_SECONDS
        .with_label_values(&[state.service.service_name()])
        .start_timer();

    let result = state.service.create_payment(&req, &trace_id).await;
    timer.observe_duration();

    match result {
        Ok(payment) => Ok(Json(PaymentResponse {
            payment_id: payment.payment_id,
            status: payment.status,
        })),
        Err(e) => {
            tracing::error!(error = %e, trace_id = %trace_id, "Payment creation failed");
            Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("payment_create_failed", e.to_string())),
            ))
        }
    }
}

/// GET /payments/{payment_id}: current status for one payment.
async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.service.get_payment(&payment_id).await {
        Ok(Some(payment)) => Ok(Json(PaymentResponse {
            payment_id: payment.payment_id,
            status: payment.status,
        })),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", "payment not found")),
        )),
        Err(e) => {
            tracing::error!(payment_id = %payment_id, error = %e, "Payment lookup failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("database_error", e.to_string())),
            ))
        }
    }
}

/// Health check endpoint handler
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
