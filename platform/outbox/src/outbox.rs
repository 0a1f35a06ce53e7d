//! Outbox claim/mark/requeue operations.
//!
//! Claiming is the only contended path: it locks candidate rows with
//! `FOR UPDATE SKIP LOCKED` so multiple publishers of one service coexist,
//! and it reclaims PROCESSING rows whose `sent_at` is older than the
//! processing timeout, which recovers events from a publisher that crashed
//! mid-flight.

use chrono::{Duration as ChronoDuration, Utc};
use event_bus::EventEnvelope;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

/// One claimed outbox row, ready to publish.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedEvent {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Insert an event into the outbox inside the caller's transaction.
///
/// The stored payload is the full envelope, so the publisher can ship it
/// verbatim without reconstructing metadata.
pub async fn enqueue_event(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_type: &str,
    topic: &str,
    envelope: &EventEnvelope,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO outbox_events
            (id, aggregate_type, aggregate_id, event_type, topic, payload, status)
        VALUES ($1, $2, $3, $4, $5, $6, 'PENDING')
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(aggregate_type)
    .bind(&envelope.aggregate_id)
    .bind(&envelope.event_type)
    .bind(topic)
    .bind(envelope.to_value())
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        event_id = %envelope.event_id,
        event_type = %envelope.event_type,
        topic = %topic,
        "Event enqueued to outbox"
    );

    Ok(())
}

/// Atomically claim a batch of pending or stale-processing rows.
///
/// Runs one transaction: select candidates with `FOR UPDATE SKIP LOCKED`,
/// flip them to PROCESSING with `sent_at = now`, and return them ordered by
/// `created_at`.
pub async fn claim_outbox_batch(
    pool: &PgPool,
    limit: i64,
    processing_timeout: Duration,
) -> Result<Vec<ClaimedEvent>, sqlx::Error> {
    let now = Utc::now();
    let stale_before = now
        - ChronoDuration::from_std(processing_timeout)
            .unwrap_or_else(|_| ChronoDuration::seconds(30));

    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as::<_, ClaimedEvent>(
        r#"
        WITH claim_ids AS (
            SELECT id
            FROM outbox_events
            WHERE status = 'PENDING'
               OR (status = 'PROCESSING' AND sent_at IS NOT NULL AND sent_at < $1)
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        UPDATE outbox_events
        SET status = 'PROCESSING', sent_at = $3
        WHERE id IN (SELECT id FROM claim_ids)
        RETURNING id, topic, payload
        "#,
    )
    .bind(stale_before)
    .bind(limit)
    .bind(now)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(rows)
}

/// Mark one claimed outbox row as delivered.
pub async fn mark_outbox_sent(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'SENT', sent_at = $2
        WHERE id = $1 AND status = 'PROCESSING'
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Return a claimed row to PENDING so it can be retried.
pub async fn requeue_outbox_event(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'PENDING', sent_at = NULL
        WHERE id = $1 AND status = 'PROCESSING'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Refresh the backlog gauges: pending depth and oldest pending age.
pub async fn update_outbox_backlog_metrics(
    pool: &PgPool,
    service_name: &str,
) -> Result<(), sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct Backlog {
        pending: i64,
        oldest: Option<chrono::DateTime<Utc>>,
    }

    let backlog = sqlx::query_as::<_, Backlog>(
        r#"
        SELECT COUNT(*) AS pending, MIN(created_at) AS oldest
        FROM outbox_events
        WHERE status IN ('PENDING', 'PROCESSING')
        "#,
    )
    .fetch_one(pool)
    .await?;

    let age_seconds = backlog
        .oldest
        .map(|oldest| (Utc::now() - oldest).num_milliseconds().max(0) as f64 / 1000.0)
        .unwrap_or(0.0);

    telemetry::OUTBOX_PENDING_TOTAL
        .with_label_values(&[service_name])
        .set(backlog.pending);
    telemetry::OUTBOX_OLDEST_PENDING_AGE_SECONDS
        .with_label_values(&[service_name])
        .set(age_seconds);

    Ok(())
}
