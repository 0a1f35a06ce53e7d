//! HTTP metrics middleware for axum services.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Per-service context for the HTTP metrics layer.
#[derive(Clone)]
pub struct HttpMetricsCtx {
    pub service: String,
}

impl HttpMetricsCtx {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

/// Record request count and latency for every HTTP call.
///
/// Wire with `axum::middleware::from_fn_with_state(ctx, track_http)`.
pub async fn track_http(
    State(ctx): State<HttpMetricsCtx>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let route = req.uri().path().to_string();
    let method = req.method().to_string();
    let start = Instant::now();

    let res = next.run(req).await;

    let status = res.status().as_u16().to_string();
    let elapsed = start.elapsed().as_secs_f64();

    crate::HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&ctx.service, &route, &method])
        .observe(elapsed);
    crate::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&ctx.service, &route, &method, &status])
        .inc();

    res
}
