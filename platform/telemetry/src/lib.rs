//! Prometheus metric families shared across the payment saga services.
//!
//! All families register against the default registry at first use, so a
//! service only pays for the metrics it actually touches. Every service
//! exposes them through [`render`] on `GET /metrics`.

pub mod middleware;

use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Encoder, GaugeVec, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref PAYMENT_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "payment_requests_total",
        "Total payment requests",
        &["service"]
    )
    .expect("metric");

    pub static ref PAYMENT_SUCCESS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "payment_success_total",
        "Total successful payments",
        &["service"]
    )
    .expect("metric");

    pub static ref PAYMENT_FAILURE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "payment_failure_total",
        "Total failed payments",
        &["service"]
    )
    .expect("metric");

    pub static ref PAYMENT_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        "payment_latency_seconds",
        "Payment request latency seconds",
        &["service"]
    )
    .expect("metric");

    pub static ref PAYMENT_E2E_SECONDS: HistogramVec = register_histogram_vec!(
        "payment_e2e_seconds",
        "Payment end-to-end duration seconds from CREATED to terminal",
        &["service", "terminal_state"]
    )
    .expect("metric");

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests",
        &["service", "route", "method", "status_code"]
    )
    .expect("metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration seconds",
        &["service", "route", "method"]
    )
    .expect("metric");

    pub static ref EVENT_QUEUE_DELAY_SECONDS: HistogramVec = register_histogram_vec!(
        "event_queue_delay_seconds",
        "Delay seconds between occurred_at and consume time",
        &["service", "topic"]
    )
    .expect("metric");

    pub static ref OUTBOX_PENDING_TOTAL: IntGaugeVec = register_int_gauge_vec!(
        "outbox_pending_total",
        "Current count of outbox events not yet sent",
        &["service"]
    )
    .expect("metric");

    pub static ref OUTBOX_OLDEST_PENDING_AGE_SECONDS: GaugeVec = register_gauge_vec!(
        "outbox_oldest_pending_age_seconds",
        "Age in seconds of the oldest pending outbox event",
        &["service"]
    )
    .expect("metric");

    pub static ref RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "retries_total",
        "Retry count per dependency",
        &["service", "dependency"]
    )
    .expect("metric");

    pub static ref DLQ_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dlq_published_total",
        "Total DLQ events published",
        &["service", "topic", "error_type"]
    )
    .expect("metric");

    pub static ref DUPLICATE_EVENTS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "duplicate_events_skipped_total",
        "Duplicate inbox events skipped",
        &["service", "topic"]
    )
    .expect("metric");
}

/// Render all registered metrics in Prometheus text exposition format.
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).map_err(|e| e.to_string())?;
    String::from_utf8(buf).map_err(|e| e.to_string())
}

/// Axum handler for `GET /metrics`.
pub async fn metrics_handler() -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics error: {e}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment_and_render() {
        PAYMENT_REQUESTS_TOTAL
            .with_label_values(&["test-service"])
            .inc();
        DUPLICATE_EVENTS_SKIPPED_TOTAL
            .with_label_values(&["test-service", "payments.captured"])
            .inc();

        let body = render().expect("render");
        assert!(body.contains("payment_requests_total"));
        assert!(body.contains("duplicate_events_skipped_total"));
        assert!(body.contains("payments.captured"));
    }

    #[test]
    fn test_gauges_settable() {
        OUTBOX_PENDING_TOTAL
            .with_label_values(&["test-service"])
            .set(7);
        OUTBOX_OLDEST_PENDING_AGE_SECONDS
            .with_label_values(&["test-service"])
            .set(12.5);

        let body = render().expect("render");
        assert!(body.contains("outbox_pending_total"));
        assert!(body.contains("outbox_oldest_pending_age_seconds"));
    }
}
