//! Consumer tasks for terminal payment events.

use chrono::Utc;
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{EventBus, EventEnvelope};
use futures::StreamExt;
use std::sync::Arc;

use crate::service::NotificationService;

const TERMINAL_TOPICS: &[&str] = &["payments.settled", "payments.failed", "payments.reversed"];

/// Start one consumer task per terminal topic.
pub async fn start_consumers(bus: Arc<dyn EventBus>, service: Arc<NotificationService>) {
    for &topic in TERMINAL_TOPICS {
        spawn_consumer(bus.clone(), service.clone(), topic);
    }
}

fn spawn_consumer(
    bus: Arc<dyn EventBus>,
    service: Arc<NotificationService>,
    subject: &'static str,
) {
    tokio::spawn(async move {
        let mut stream = match bus.subscribe(subject).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
                return;
            }
        };

        tracing::info!(subject = %subject, "Notification consumer subscribed");

        let retry_config = RetryConfig::default();

        while let Some(msg) = stream.next().await {
            let event: EventEnvelope = match serde_json::from_slice(&msg.payload) {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(
                        subject = %msg.subject,
                        error = %e,
                        "Failed to parse event envelope"
                    );
                    continue;
                }
            };

            let delay = (Utc::now() - event.occurred_at).num_milliseconds().max(0) as f64 / 1000.0;
            telemetry::EVENT_QUEUE_DELAY_SECONDS
                .with_label_values(&[service.service_name(), subject])
                .observe(delay);

            let result = retry_with_backoff(
                || {
                    let service = service.clone();
                    let event = event.clone();
                    async move {
                        service
                            .handle_result(&event)
                            .await
                            .map_err(|e| e.to_string())
                    }
                },
                &retry_config,
                subject,
            )
            .await;

            if let Err(error) = result {
                tracing::error!(
                    subject = %subject,
                    event_id = %event.event_id,
                    error = %error,
                    "Notification write failed after retries, dropping message"
                );
            }
        }

        tracing::warn!(subject = %subject, "Notification consumer stopped");
    });
}
