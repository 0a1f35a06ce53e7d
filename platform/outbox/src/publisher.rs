//! Background task publishing claimed outbox rows to the event bus.

use crate::{
    claim_outbox_batch, mark_outbox_sent, requeue_outbox_event, update_outbox_backlog_metrics,
};
use event_bus::EventBus;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Tuning for one publisher loop.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Max rows claimed per iteration.
    pub batch_size: i64,
    /// Age after which a PROCESSING row is considered abandoned.
    pub processing_timeout: Duration,
    /// Idle sleep between iterations.
    pub poll_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            processing_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Continuously publish and ack pending outbox events.
///
/// Claim and publish are intentionally split across transactions: the claim
/// commits first, then each publish happens outside any transaction, and the
/// row is marked SENT or requeued to PENDING depending on the outcome. A
/// crash between claim and ack leaves the row in PROCESSING until the
/// processing timeout reclaims it.
pub async fn run_outbox_publisher(
    pool: PgPool,
    bus: Arc<dyn EventBus>,
    service_name: String,
    config: PublisherConfig,
) {
    tracing::info!(service = %service_name, "Starting outbox publisher task");

    loop {
        let claimed = match claim_outbox_batch(&pool, config.batch_size, config.processing_timeout)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(service = %service_name, error = %e, "Outbox claim failed");
                sleep(config.poll_interval).await;
                continue;
            }
        };

        if let Err(e) = update_outbox_backlog_metrics(&pool, &service_name).await {
            tracing::warn!(service = %service_name, error = %e, "Backlog gauge refresh failed");
        }

        for event in claimed {
            let bytes = match serde_json::to_vec(&event.payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Unserializable payloads cannot make progress; park the
                    // row back in PENDING so it stays visible in the backlog.
                    tracing::error!(
                        outbox_id = %event.id,
                        topic = %event.topic,
                        error = %e,
                        "Outbox payload serialization failed"
                    );
                    if let Err(e) = requeue_outbox_event(&pool, event.id).await {
                        tracing::error!(outbox_id = %event.id, error = %e, "Requeue failed");
                    }
                    continue;
                }
            };

            match bus.publish(&event.topic, bytes).await {
                Ok(()) => {
                    if let Err(e) = mark_outbox_sent(&pool, event.id).await {
                        tracing::error!(
                            outbox_id = %event.id,
                            topic = %event.topic,
                            error = %e,
                            "Failed to mark outbox row as sent"
                        );
                    } else {
                        tracing::debug!(
                            outbox_id = %event.id,
                            topic = %event.topic,
                            "Outbox event published"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        outbox_id = %event.id,
                        topic = %event.topic,
                        error = %e,
                        "Outbox publish failed, requeueing"
                    );
                    if let Err(e) = requeue_outbox_event(&pool, event.id).await {
                        tracing::error!(outbox_id = %event.id, error = %e, "Requeue failed");
                    }
                }
            }
        }

        sleep(config.poll_interval).await;
    }
}
