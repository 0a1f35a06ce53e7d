//! Consumer task for `payments.requested`.

use chrono::Utc;
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{EventBus, EventEnvelope};
use futures::StreamExt;
use std::sync::Arc;

use crate::service::{RiskService, TOPIC_PAYMENTS_REQUESTED};

/// Start the payment-requested consumer task.
pub async fn start_payment_requested_consumer(bus: Arc<dyn EventBus>, service: Arc<RiskService>) {
    tokio::spawn(async move {
        let subject = TOPIC_PAYMENTS_REQUESTED;
        let mut stream = match bus.subscribe(subject).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
                return;
            }
        };

        tracing::info!(subject = %subject, "Risk consumer subscribed");

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

            tracing::info!(
                event_id = %event.event_id,
                aggregate_id = %event.aggregate_id,
                trace_id = %event.trace_id,
                "Payment requested event received"
            );

            let result = retry_with_backoff(
                || {
                    let service = service.clone();
                    let event = event.clone();
                    async move {
                        service
                            .handle_payment_requested(&event)
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
                    event_id = %event.event_id,
                    aggregate_id = %event.aggregate_id,
                    error = %error,
                    "Risk handling failed after retries, dropping message"
                );
            }
        }

        tracing::warn!(subject = %subject, "Risk consumer stopped");
    });
}
