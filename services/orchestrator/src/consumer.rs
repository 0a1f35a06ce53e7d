//! Topic consumer tasks for the orchestrator.
//!
//! One background task per subscribed topic. Each message is parsed into the
//! platform envelope, measured for queue delay, and dispatched to the saga
//! handler with bounded retries for transient failures. A message that still
//! fails is logged and dropped; the inbox plus redelivery are the recovery
//! mechanism, not this loop.

use chrono::Utc;
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{EventBus, EventEnvelope};
use futures::StreamExt;
use std::sync::Arc;

use crate::service::{
    OrchestratorService, TOPIC_PAYMENTS_AUTHORIZED, TOPIC_PAYMENTS_FAILED, TOPIC_PAYMENTS_SETTLED,
    TOPIC_RISK_APPROVED, TOPIC_RISK_DENIED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrchestratorTopic {
    RiskApproved,
    RiskDenied,
    Authorized,
    Failed,
    Settled,
}

impl OrchestratorTopic {
    fn as_str(self) -> &'static str {
        match self {
            OrchestratorTopic::RiskApproved => TOPIC_RISK_APPROVED,
            OrchestratorTopic::RiskDenied => TOPIC_RISK_DENIED,
            OrchestratorTopic::Authorized => TOPIC_PAYMENTS_AUTHORIZED,
            OrchestratorTopic::Failed => TOPIC_PAYMENTS_FAILED,
            OrchestratorTopic::Settled => TOPIC_PAYMENTS_SETTLED,
        }
    }
}

/// Start all orchestrator consumers.
pub async fn start_consumers(bus: Arc<dyn EventBus>, service: Arc<OrchestratorService>) {
    for topic in [
        OrchestratorTopic::RiskApproved,
        OrchestratorTopic::RiskDenied,
        OrchestratorTopic::Authorized,
        OrchestratorTopic::Failed,
        OrchestratorTopic::Settled,
    ] {
        spawn_consumer(bus.clone(), service.clone(), topic);
    }
}

fn spawn_consumer(
    bus: Arc<dyn EventBus>,
    service: Arc<OrchestratorService>,
    topic: OrchestratorTopic,
) {
    tokio::spawn(async move {
        let subject = topic.as_str();
        let mut stream = match bus.subscribe(subject).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(subject = %subject, error = %e, "Failed to subscribe");
                return;
            }
        };

        tracing::info!(subject = %subject, "Orchestrator consumer subscribed");

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

            observe_queue_delay(service.service_name(), subject, &event);

            tracing::info!(
                subject = %subject,
                event_id = %event.event_id,
                aggregate_id = %event.aggregate_id,
                trace_id = %event.trace_id,
                "Event received"
            );

            let result = retry_with_backoff(
                || {
                    let service = service.clone();
                    let event = event.clone();
                    async move { dispatch(&service, topic, &event).await.map_err(|e| e.to_string()) }
                },
                &retry_config,
                subject,
            )
            .await;

            if let Err(error) = result {
                tracing::error!(
                    subject = %subject,
                    event_id = %event.event_id,
                    aggregate_id = %event.aggregate_id,
                    error = %error,
                    "Handler failed after retries, dropping message"
                );
            }
        }

        tracing::warn!(subject = %subject, "Orchestrator consumer stopped");
    });
}

async fn dispatch(
    service: &OrchestratorService,
    topic: OrchestratorTopic,
    event: &EventEnvelope,
) -> Result<(), crate::service::OrchestratorError> {
    match topic {
        OrchestratorTopic::RiskApproved => service.handle_risk_approved(event).await,
        OrchestratorTopic::RiskDenied => service.handle_risk_denied(event).await,
        OrchestratorTopic::Authorized => service.handle_authorized(event).await,
        OrchestratorTopic::Failed => service.handle_failed(event).await,
        OrchestratorTopic::Settled => service.handle_settled(event).await,
    }
}

fn observe_queue_delay(service_name: &str, topic: &str, event: &EventEnvelope) {
    let delay = (Utc::now() - event.occurred_at).num_milliseconds().max(0) as f64 / 1000.0;
    telemetry::EVENT_QUEUE_DELAY_SECONDS
        .with_label_values(&[service_name, topic])
        .observe(delay);
}
