//! Inbox deduplication for consumed events.
//!
//! A consumer checks `inbox_seen` before doing any work and inserts its
//! marker row inside the same transaction as the business mutation. The
//! composite primary key on `(event_id, consumed_by_service)` is the
//! backstop: two racing deliveries of one event cannot both commit.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Check whether this service has already consumed the event.
pub async fn inbox_seen(
    pool: &PgPool,
    event_id: Uuid,
    service_name: &str,
) -> Result<bool, sqlx::Error> {
    let seen = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM inbox_events
            WHERE event_id = $1 AND consumed_by_service = $2
        )
        "#,
    )
    .bind(event_id)
    .bind(service_name)
    .fetch_one(pool)
    .await?;

    Ok(seen)
}

/// Record the event as consumed within the caller's transaction.
pub async fn mark_inbox(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
    service_name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO inbox_events (event_id, consumed_by_service)
        VALUES ($1, $2)
        "#,
    )
    .bind(event_id)
    .bind(service_name)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
