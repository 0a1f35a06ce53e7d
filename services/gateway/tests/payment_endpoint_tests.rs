use axum::body::Body;
use axum::http::{Request, StatusCode};
use gateway_rs::routes::{router, GatewayState};
use kv_store::InMemoryKv;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-api-key";

fn state(orchestrator_url: &str, rate_limit_per_minute: u32) -> GatewayState {
    GatewayState::new(
        Arc::new(InMemoryKv::new()),
        API_KEY.to_string(),
        orchestrator_url.to_string(),
        rate_limit_per_minute,
        86_400,
        "gateway-test".to_string(),
    )
}

fn payment_body(customer_id: &str, idempotency_key: &str) -> String {
    json!({
        "customer_id": customer_id,
        "amount_cents": 5000,
        "currency": "USD",
        "idempotency_key": idempotency_key,
    })
    .to_string()
}

fn request(body: String, api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments")
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_api_key_rejected() {
    let app = router(state("http://localhost:1", 30));

    let response = app
        .oneshot(request(payment_body("cust-1", "key-12345"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_body_rejected() {
    let app = router(state("http://localhost:1", 30));

    let body = json!({
        "customer_id": "cust-1",
        "amount_cents": 0,
        "currency": "USD",
        "idempotency_key": "key-12345",
    })
    .to_string();

    let response = app
        .oneshot(request(body, Some(API_KEY)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_forwards_to_orchestrator() {
    let orchestrator = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/payments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"payment_id": "pay-1", "status": "CREATED"})),
        )
        .expect(1)
        .mount(&orchestrator)
        .await;

    let app = router(state(&orchestrator.uri(), 30));

    let response = app
        .oneshot(request(payment_body("cust-1", "key-12345"), Some(API_KEY)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let payload = body_json(response).await;
    assert_eq!(payload["payment_id"], "pay-1");
    assert_eq!(payload["status"], "CREATED");
}

#[tokio::test]
async fn test_idempotent_replay_served_from_cache() {
    let orchestrator = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/payments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"payment_id": "pay-cached", "status": "CREATED"})),
        )
        .expect(1) // second request must not reach the orchestrator
        .mount(&orchestrator)
        .await;

    let app = router(state(&orchestrator.uri(), 30));

    let first = app
        .clone()
        .oneshot(request(payment_body("cust-1", "key-cache"), Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(request(payment_body("cust-1", "key-cache"), Some(API_KEY)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let payload = body_json(second).await;
    assert_eq!(payload["payment_id"], "pay-cached");
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let orchestrator = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/payments"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"payment_id": "pay-x", "status": "CREATED"})),
        )
        .mount(&orchestrator)
        .await;

    let app = router(state(&orchestrator.uri(), 2));

    for i in 0..2 {
        let response = app
            .clone()
            .oneshot(request(
                payment_body("cust-limited", &format!("key-rl-{i}")),
                Some(API_KEY),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(request(
            payment_body("cust-limited", "key-rl-last"),
            Some(API_KEY),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_orchestrator_errors_forwarded() {
    let orchestrator = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/payments"))
        .respond_with(ResponseTemplate::new(400).set_body_string("duplicate key"))
        .mount(&orchestrator)
        .await;

    let app = router(state(&orchestrator.uri(), 30));

    let response = app
        .oneshot(request(payment_body("cust-1", "key-err-1"), Some(API_KEY)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
