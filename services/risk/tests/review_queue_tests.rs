mod common;

use async_trait::async_trait;
use event_bus::EventEnvelope;
use kv_store::InMemoryKv;
use risk_rs::rules::{Decision, RiskThresholds};
use risk_rs::service::{ManualDecisionError, PaymentStatusClient};
use risk_rs::RiskService;
use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Fake orchestrator that always reports the configured status.
struct FixedStatusClient(&'static str);

#[async_trait]
impl PaymentStatusClient for FixedStatusClient {
    async fn fetch_status(&self, _payment_id: &str) -> Result<String, ManualDecisionError> {
        Ok(self.0.to_string())
    }
}

fn service(pool: &PgPool, orchestrator_status: &'static str) -> RiskService {
    RiskService::new(
        pool.clone(),
        Arc::new(InMemoryKv::new()),
        Arc::new(FixedStatusClient(orchestrator_status)),
        RiskThresholds::default(),
        "risk-test",
    )
}

fn requested_event(payment_id: &str, customer_id: &str, amount_cents: i64) -> EventEnvelope {
    EventEnvelope::new(
        "payments.requested",
        payment_id,
        "trace-test",
        json!({
            "customer_id": customer_id,
            "amount_cents": amount_cents,
            "currency": "USD",
        }),
    )
}

/// TEST 1: a normal payment is approved and no review row is created
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_normal_payment_approved() {
    let pool = common::setup_pool().await;
    let service = service(&pool, "RISK_REVIEW");

    let payment_id = format!("pay-{}", Uuid::new_v4());
    let customer = format!("cust-{}", Uuid::new_v4());
    service
        .handle_payment_requested(&requested_event(&payment_id, &customer, 5000))
        .await
        .expect("handle");

    let topic: String = sqlx::query_scalar(
        "SELECT topic FROM outbox_events WHERE aggregate_id = $1",
    )
    .bind(&payment_id)
    .fetch_one(&pool)
    .await
    .expect("outbox row");
    assert_eq!(topic, "risk.approved");

    let reviews: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM risk_reviews WHERE payment_id = $1")
            .bind(&payment_id)
            .fetch_one(&pool)
            .await
            .expect("reviews");
    assert_eq!(reviews, 0);

    common::teardown_pool(pool).await;
}

/// TEST 2: a high amount parks the payment in the review queue
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_high_amount_creates_pending_review() {
    let pool = common::setup_pool().await;
    let service = service(&pool, "RISK_REVIEW");

    let payment_id = format!("pay-{}", Uuid::new_v4());
    let customer = format!("cust-{}", Uuid::new_v4());
    service
        .handle_payment_requested(&requested_event(&payment_id, &customer, 200_000))
        .await
        .expect("handle");

    let payload: serde_json::Value = sqlx::query_scalar(
        "SELECT payload FROM outbox_events WHERE aggregate_id = $1 AND topic = 'risk.denied'",
    )
    .bind(&payment_id)
    .fetch_one(&pool)
    .await
    .expect("outcome");
    assert_eq!(payload["payload"]["decision"], "REVIEW");
    assert_eq!(payload["payload"]["reason"], "high_amount");

    #[derive(sqlx::FromRow)]
    struct Review {
        status: String,
        reason: String,
    }
    let review: Review =
        sqlx::query_as("SELECT status, reason FROM risk_reviews WHERE payment_id = $1")
            .bind(&payment_id)
            .fetch_one(&pool)
            .await
            .expect("review row");
    assert_eq!(review.status, "PENDING");
    assert_eq!(review.reason, "high_amount");

    common::teardown_pool(pool).await;
}

/// TEST 3: manual approve finalizes the review and emits risk.approved
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_manual_approve_flow() {
    let pool = common::setup_pool().await;
    let service = service(&pool, "RISK_REVIEW");

    let payment_id = format!("pay-{}", Uuid::new_v4());
    let customer = format!("cust-{}", Uuid::new_v4());
    service
        .handle_payment_requested(&requested_event(&payment_id, &customer, 200_000))
        .await
        .expect("handle");

    let review = service
        .manual_decision(&payment_id, Decision::Approve, "opsA", "trace-manual")
        .await
        .expect("manual approve");

    assert_eq!(review.status, "APPROVED");
    assert_eq!(review.reviewed_by.as_deref(), Some("opsA"));
    assert!(review.reviewed_at.is_some());
    assert!(review.decision_event_id.is_some());

    let payload: serde_json::Value = sqlx::query_scalar(
        "SELECT payload FROM outbox_events WHERE aggregate_id = $1 AND topic = 'risk.approved'",
    )
    .bind(&payment_id)
    .fetch_one(&pool)
    .await
    .expect("approved event");
    assert_eq!(payload["payload"]["reason"], "manual_approve");
    assert_eq!(payload["payload"]["review_status"], "APPROVED");

    // A second decision conflicts
    let err = service
        .manual_decision(&payment_id, Decision::Deny, "opsB", "trace-again")
        .await
        .expect_err("already finalized");
    assert!(matches!(err, ManualDecisionError::AlreadyFinalized(_)));

    common::teardown_pool(pool).await;
}

/// TEST 4: manual decisions require the payment to sit in RISK_REVIEW
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_manual_decision_requires_risk_review_state() {
    let pool = common::setup_pool().await;
    let service = service(&pool, "SETTLED");

    let payment_id = format!("pay-{}", Uuid::new_v4());
    let customer = format!("cust-{}", Uuid::new_v4());
    service
        .handle_payment_requested(&requested_event(&payment_id, &customer, 200_000))
        .await
        .expect("handle");

    let err = service
        .manual_decision(&payment_id, Decision::Approve, "opsA", "trace-x")
        .await
        .expect_err("wrong state");
    assert!(matches!(err, ManualDecisionError::WrongPaymentState(_)));

    common::teardown_pool(pool).await;
}

/// TEST 5: unknown reviews 404
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_manual_decision_unknown_review() {
    let pool = common::setup_pool().await;
    let service = service(&pool, "RISK_REVIEW");

    let err = service
        .manual_decision("pay-nothing", Decision::Approve, "opsA", "trace-x")
        .await
        .expect_err("missing");
    assert!(matches!(err, ManualDecisionError::NotFound));

    common::teardown_pool(pool).await;
}

/// TEST 6: duplicate requested events do not double-count velocity
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_requested_event_skipped() {
    let pool = common::setup_pool().await;
    let service = service(&pool, "RISK_REVIEW");

    let payment_id = format!("pay-{}", Uuid::new_v4());
    let customer = format!("cust-{}", Uuid::new_v4());
    let event = requested_event(&payment_id, &customer, 5000);
    service.handle_payment_requested(&event).await.expect("first");
    service.handle_payment_requested(&event).await.expect("second");

    let outcomes: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE aggregate_id = $1")
            .bind(&payment_id)
            .fetch_one(&pool)
            .await
            .expect("count");
    assert_eq!(outcomes, 1);

    common::teardown_pool(pool).await;
}
