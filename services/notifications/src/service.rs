//! Notification log writer for terminal payment events.

use event_bus::EventEnvelope;
use outbox::{inbox_seen, mark_inbox};
use sqlx::PgPool;
use uuid::Uuid;

/// Writes one notification row per terminal event, skipping duplicates.
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    service_name: String,
}

impl NotificationService {
    pub fn new(pool: PgPool, service_name: impl Into<String>) -> Self {
        Self {
            pool,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Persist one notification log, skipping duplicate events safely.
    pub async fn handle_result(&self, event: &EventEnvelope) -> Result<(), sqlx::Error> {
        if inbox_seen(&self.pool, event.event_id, &self.service_name).await? {
            tracing::info!(
                topic = %event.event_type,
                event_id = %event.event_id,
                "Duplicate event skipped"
            );
            telemetry::DUPLICATE_EVENTS_SKIPPED_TOTAL
                .with_label_values(&[&self.service_name, &event.event_type])
                .inc();
            return Ok(());
        }

        let message = format!(
            "Payment {} event={}",
            event.aggregate_id, event.event_type
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO notification_logs (id, payment_id, channel, message)
            VALUES ($1, $2, 'webhook', $3)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&event.aggregate_id)
        .bind(&message)
        .execute(&mut *tx)
        .await?;
        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;
        tx.commit().await?;

        tracing::info!(payment_id = %event.aggregate_id, "{}", message);
        Ok(())
    }
}
