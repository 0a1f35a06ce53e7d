//! Public payment entrypoint.
//!
//! Order of gates on `POST /payments`: API key, body validation, per-customer
//! rate limit, idempotency cache, forward to orchestrator. Cached responses
//! are scoped per customer so idempotency keys cannot collide across
//! customers; a cache outage degrades to a normal forwarded request, and the
//! orchestrator's unique `idempotency_key` constraint keeps correctness.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use kv_store::KvStore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{ErrorResponse, PaymentRequest};
use crate::rate_limit::TokenBucket;

#[derive(Clone)]
pub struct GatewayState {
    pub kv: Arc<dyn KvStore>,
    pub http: reqwest::Client,
    pub bucket: TokenBucket,
    pub api_key: String,
    pub orchestrator_url: String,
    pub idempotency_ttl_seconds: u64,
    pub service_name: String,
}

impl GatewayState {
    pub fn new(
        kv: Arc<dyn KvStore>,
        api_key: String,
        orchestrator_url: String,
        rate_limit_per_minute: u32,
        idempotency_ttl_seconds: u64,
        service_name: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client");
        let bucket = TokenBucket::new(kv.clone(), rate_limit_per_minute);
        Self {
            kv,
            http,
            bucket,
            api_key,
            orchestrator_url,
            idempotency_ttl_seconds,
            service_name,
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .with_state(state)
}

fn idempotency_cache_key(customer_id: &str, idempotency_key: &str) -> String {
    // Scoped by customer so keys cannot collide across customers.
    format!("idempotency:payment:{customer_id}:{idempotency_key}")
}

/// POST /payments: create (or fetch existing) payment through the
/// orchestrator.
async fn create_payment(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<PaymentRequest>,
) -> Response {
    let provided_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided_key != Some(state.api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("unauthorized", "invalid API key")),
        )
            .into_response();
    }

    if let Err(message) = req.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("validation_error", message)),
        )
            .into_response();
    }

    if !state.bucket.try_acquire(&req.customer_id).await {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new("rate_limited", "rate limit exceeded")),
        )
            .into_response();
    }

    let trace_id = headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let cache_key = idempotency_cache_key(&req.customer_id, &req.idempotency_key);
    match state.kv.get(&cache_key).await {
        Ok(Some(cached)) => {
            if let Ok(payload) = serde_json::from_str::<serde_json::Value>(&cached) {
                tracing::info!(
                    customer_id = %req.customer_id,
                    trace_id = %trace_id,
                    "Idempotency cache hit"
                );
                return Json(payload).into_response();
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Idempotency cache read failed");
        }
    }

    telemetry::PAYMENT_REQUESTS_TOTAL
        .with_label_values(&[&state.service_name])
        .inc();
    let timer = telemetry::PAYMENT_LATENCY_SECONDS
        .with_label_values(&[&state.service_name])
        .start_timer();

    let response = state
        .http
        .post(format!("{}/internal/payments", state.orchestrator_url))
        .header("x-trace-id", &trace_id)
        .json(&req)
        .send()
        .await;
    timer.observe_duration();

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, trace_id = %trace_id, "Orchestrator unreachable");
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::new("upstream_error", e.to_string())),
            )
                .into_response();
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, trace_id = %trace_id, "Orchestrator rejected payment");
        return (status, body).into_response();
    }

    let payload: serde_json::Value = match response.json().await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, trace_id = %trace_id, "Malformed orchestrator response");
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::new("upstream_error", e.to_string())),
            )
                .into_response();
        }
    };

    if let Ok(raw) = serde_json::to_string(&payload) {
        if let Err(e) = state
            .kv
            .set_ex(&cache_key, &raw, state.idempotency_ttl_seconds)
            .await
        {
            tracing::warn!(error = %e, "Idempotency cache write failed");
        }
    }

    Json(payload).into_response()
}

/// Health check endpoint handler
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
