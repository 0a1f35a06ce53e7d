//! Claim/requeue semantics against a live Postgres.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p outbox -- --ignored

use event_bus::EventEnvelope;
use outbox::{
    claim_outbox_batch, enqueue_event, inbox_seen, mark_inbox, mark_outbox_sent,
    requeue_outbox_event,
};
use serde_json::json;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

async fn setup_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_events (
            id              UUID PRIMARY KEY,
            aggregate_type  TEXT NOT NULL,
            aggregate_id    TEXT NOT NULL,
            event_type      TEXT NOT NULL,
            topic           TEXT NOT NULL,
            payload         JSONB NOT NULL,
            status          TEXT NOT NULL DEFAULT 'PENDING',
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            sent_at         TIMESTAMPTZ
        );
        CREATE TABLE IF NOT EXISTS inbox_events (
            event_id             UUID NOT NULL,
            consumed_by_service  TEXT NOT NULL,
            consumed_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (event_id, consumed_by_service)
        );
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create test tables");

    pool
}

async fn enqueue_test_event(pool: &PgPool, aggregate_id: &str) -> EventEnvelope {
    let envelope = EventEnvelope::new(
        "payments.requested",
        aggregate_id,
        "trace-test",
        json!({"amount_cents": 100}),
    );
    let mut tx = pool.begin().await.expect("begin");
    enqueue_event(&mut tx, "payment", "payments.requested", &envelope)
        .await
        .expect("enqueue");
    tx.commit().await.expect("commit");
    envelope
}

async fn row_status(pool: &PgPool, id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM outbox_events WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("status")
}

/// TEST 1: claim flips PENDING rows to PROCESSING and returns them in order
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_claim_marks_processing() {
    let pool = setup_pool().await;
    let aggregate_id = format!("agg-{}", Uuid::new_v4());

    enqueue_test_event(&pool, &aggregate_id).await;
    enqueue_test_event(&pool, &aggregate_id).await;

    let claimed = claim_outbox_batch(&pool, 100, Duration::from_secs(30))
        .await
        .expect("claim");

    let mine: Vec<_> = claimed
        .iter()
        .filter(|c| c.payload["aggregate_id"] == aggregate_id.as_str())
        .collect();
    assert_eq!(mine.len(), 2);

    for event in &mine {
        assert_eq!(row_status(&pool, event.id).await, "PROCESSING");
    }

    // A second claim pass must not hand them out again
    let reclaimed = claim_outbox_batch(&pool, 100, Duration::from_secs(30))
        .await
        .expect("claim");
    assert!(
        !reclaimed.iter().any(|c| mine.iter().any(|m| m.id == c.id)),
        "fresh PROCESSING rows are not reclaimable"
    );

    common_cleanup(&pool, &aggregate_id).await;
}

/// TEST 2: mark-sent and requeue move a claimed row to its terminal states
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_mark_sent_and_requeue() {
    let pool = setup_pool().await;
    let aggregate_id = format!("agg-{}", Uuid::new_v4());

    enqueue_test_event(&pool, &aggregate_id).await;
    enqueue_test_event(&pool, &aggregate_id).await;

    let claimed = claim_outbox_batch(&pool, 100, Duration::from_secs(30))
        .await
        .expect("claim");
    let mine: Vec<_> = claimed
        .iter()
        .filter(|c| c.payload["aggregate_id"] == aggregate_id.as_str())
        .collect();
    assert_eq!(mine.len(), 2);

    mark_outbox_sent(&pool, mine[0].id).await.expect("sent");
    requeue_outbox_event(&pool, mine[1].id).await.expect("requeue");

    assert_eq!(row_status(&pool, mine[0].id).await, "SENT");
    assert_eq!(row_status(&pool, mine[1].id).await, "PENDING");

    common_cleanup(&pool, &aggregate_id).await;
}

/// TEST 3: stale PROCESSING rows are reclaimed after the processing timeout
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_stale_processing_rows_reclaimed() {
    let pool = setup_pool().await;
    let aggregate_id = format!("agg-{}", Uuid::new_v4());

    enqueue_test_event(&pool, &aggregate_id).await;
    let claimed = claim_outbox_batch(&pool, 100, Duration::from_secs(30))
        .await
        .expect("claim");
    let mine: Vec<_> = claimed
        .iter()
        .filter(|c| c.payload["aggregate_id"] == aggregate_id.as_str())
        .collect();
    assert_eq!(mine.len(), 1);

    // Simulate a publisher that died mid-flight 60s ago
    sqlx::query("UPDATE outbox_events SET sent_at = now() - interval '60 seconds' WHERE id = $1")
        .bind(mine[0].id)
        .execute(&pool)
        .await
        .expect("age row");

    let reclaimed = claim_outbox_batch(&pool, 100, Duration::from_secs(30))
        .await
        .expect("claim");
    assert!(
        reclaimed.iter().any(|c| c.id == mine[0].id),
        "stale row must be reclaimed"
    );

    common_cleanup(&pool, &aggregate_id).await;
}

/// TEST 4: inbox dedup sees exactly what was marked
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_inbox_round_trip() {
    let pool = setup_pool().await;
    let event_id = Uuid::new_v4();

    assert!(!inbox_seen(&pool, event_id, "test-service").await.expect("seen"));

    let mut tx = pool.begin().await.expect("begin");
    mark_inbox(&mut tx, event_id, "test-service").await.expect("mark");
    tx.commit().await.expect("commit");

    assert!(inbox_seen(&pool, event_id, "test-service").await.expect("seen"));
    // A different consumer has its own dedup scope
    assert!(!inbox_seen(&pool, event_id, "other-service").await.expect("seen"));

    sqlx::query("DELETE FROM inbox_events WHERE event_id = $1")
        .bind(event_id)
        .execute(&pool)
        .await
        .ok();
}

/// TEST 5: double-marking one event for one consumer violates the key
#[tokio::test]
#[serial]
#[ignore = "requires DATABASE_URL"]
async fn test_inbox_rejects_double_mark() {
    let pool = setup_pool().await;
    let event_id = Uuid::new_v4();

    let mut tx = pool.begin().await.expect("begin");
    mark_inbox(&mut tx, event_id, "test-service").await.expect("mark");
    tx.commit().await.expect("commit");

    let mut tx = pool.begin().await.expect("begin");
    let result = mark_inbox(&mut tx, event_id, "test-service").await;
    assert!(result.is_err(), "composite key must reject the duplicate");
    drop(tx);

    sqlx::query("DELETE FROM inbox_events WHERE event_id = $1")
        .bind(event_id)
        .execute(&pool)
        .await
        .ok();
}

async fn common_cleanup(pool: &PgPool, aggregate_id: &str) {
    sqlx::query("DELETE FROM outbox_events WHERE aggregate_id = $1")
        .bind(aggregate_id)
        .execute(pool)
        .await
        .ok();
}
