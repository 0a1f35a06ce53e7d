//! Provider interaction flow with retries and DLQ handling.
//!
//! The inbox row is marked and committed *before* the attempt loop runs:
//! the request was received exactly once, and attempts are best-effort with
//! bounded retries. A crash mid-attempt therefore does not retry. Business
//! compensation for terminal timeouts happens in the orchestrator, driven by
//! the `payments.failed` event this service emits.

use event_bus::EventEnvelope;
use outbox::{enqueue_event, inbox_seen, mark_inbox};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use uuid::Uuid;

use crate::provider::{ProviderGateway, ProviderOutcome};

pub const TOPIC_AUTHORIZE_REQUESTED: &str = "provider.authorize.requested";
pub const TOPIC_PAYMENTS_AUTHORIZED: &str = "payments.authorized";
pub const TOPIC_PAYMENTS_FAILED: &str = "payments.failed";
pub const TOPIC_PAYMENTS_DLQ: &str = "payments.dlq";

const MAX_ATTEMPTS: u32 = 3;

/// Consumes authorize requests and emits authorized/failed outcomes.
#[derive(Clone)]
pub struct ProviderAdapterService {
    pool: PgPool,
    service_name: String,
    gateway: Arc<dyn ProviderGateway>,
}

impl ProviderAdapterService {
    pub fn new(
        pool: PgPool,
        service_name: impl Into<String>,
        gateway: Arc<dyn ProviderGateway>,
    ) -> Self {
        Self {
            pool,
            service_name: service_name.into(),
            gateway,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Run the provider flow for one authorize request.
    pub async fn handle_authorize_request(
        &self,
        event: &EventEnvelope,
    ) -> Result<(), sqlx::Error> {
        if inbox_seen(&self.pool, event.event_id, &self.service_name).await? {
            tracing::info!(
                topic = TOPIC_AUTHORIZE_REQUESTED,
                event_id = %event.event_id,
                "Duplicate event skipped"
            );
            telemetry::DUPLICATE_EVENTS_SKIPPED_TOTAL
                .with_label_values(&[&self.service_name, TOPIC_AUTHORIZE_REQUESTED])
                .inc();
            return Ok(());
        }

        // Mark the request consumed up front; everything after this commit
        // is driven off the already-acknowledged event.
        let mut tx = self.pool.begin().await?;
        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;

        let customer_id = match validate_authorize_payload(&event.payload) {
            Ok(payload) => payload.customer_id,
            Err(reason) => {
                self.enqueue_dlq(&mut tx, event, &reason, "NON_RETRYABLE", false, None)
                    .await?;
                tx.commit().await?;
                tracing::warn!(
                    event_id = %event.event_id,
                    reason = %reason,
                    "Non-retryable provider request dropped"
                );
                return Ok(());
            }
        };
        tx.commit().await?;

        for attempt in 1..=MAX_ATTEMPTS {
            let start = Instant::now();
            let outcome = self.gateway.decide(&customer_id, attempt);
            let latency_ms = start.elapsed().as_millis() as i32;

            match outcome {
                ProviderOutcome::Success => {
                    let mut tx = self.pool.begin().await?;
                    insert_attempt(
                        &mut tx,
                        &event.aggregate_id,
                        attempt as i32,
                        "AUTHORIZED",
                        latency_ms,
                        None,
                    )
                    .await?;

                    let authorized = EventEnvelope::new(
                        TOPIC_PAYMENTS_AUTHORIZED,
                        &event.aggregate_id,
                        &event.trace_id,
                        json!({ "attempt_number": attempt, "latency_ms": latency_ms }),
                    );
                    enqueue_event(&mut tx, "payment", TOPIC_PAYMENTS_AUTHORIZED, &authorized)
                        .await?;
                    tx.commit().await?;

                    tracing::info!(
                        payment_id = %event.aggregate_id,
                        attempt = attempt,
                        "Provider authorized payment"
                    );
                    return Ok(());
                }
                ProviderOutcome::Decline => {
                    // Non-retryable business outcome
                    let mut tx = self.pool.begin().await?;
                    insert_attempt(
                        &mut tx,
                        &event.aggregate_id,
                        attempt as i32,
                        "FAILED",
                        latency_ms,
                        Some("PROVIDER_DECLINE"),
                    )
                    .await?;

                    let failed = EventEnvelope::new(
                        TOPIC_PAYMENTS_FAILED,
                        &event.aggregate_id,
                        &event.trace_id,
                        json!({
                            "attempt_number": attempt,
                            "latency_ms": latency_ms,
                            "error_code": "PROVIDER_DECLINE",
                        }),
                    );
                    enqueue_event(&mut tx, "payment", TOPIC_PAYMENTS_FAILED, &failed).await?;
                    tx.commit().await?;

                    tracing::info!(
                        payment_id = %event.aggregate_id,
                        attempt = attempt,
                        "Provider declined payment"
                    );
                    return Ok(());
                }
                ProviderOutcome::Timeout => {
                    telemetry::RETRIES_TOTAL
                        .with_label_values(&[&self.service_name, "provider"])
                        .inc();

                    // Exponential backoff: 1s, 2s, 4s.
                    let backoff_seconds = 1u64 << (attempt - 1);
                    tracing::warn!(
                        payment_id = %event.aggregate_id,
                        attempt = attempt,
                        backoff_s = backoff_seconds,
                        "Provider timeout"
                    );
                    sleep(Duration::from_secs(backoff_seconds)).await;
                }
            }
        }

        // All attempts timed out: terminal failure plus a replayable DLQ
        // envelope carrying the original event.
        let mut tx = self.pool.begin().await?;
        let failed = EventEnvelope::new(
            TOPIC_PAYMENTS_FAILED,
            &event.aggregate_id,
            &event.trace_id,
            json!({
                "attempt_number": MAX_ATTEMPTS,
                "latency_ms": 0,
                "error_code": "PROVIDER_TIMEOUT",
            }),
        );
        enqueue_event(&mut tx, "payment", TOPIC_PAYMENTS_FAILED, &failed).await?;
        self.enqueue_dlq(
            &mut tx,
            event,
            "PROVIDER_TIMEOUT",
            "RETRY_EXHAUSTED",
            true,
            Some(TOPIC_AUTHORIZE_REQUESTED),
        )
        .await?;
        tx.commit().await?;

        tracing::error!(
            payment_id = %event.aggregate_id,
            attempts = MAX_ATTEMPTS,
            "Provider retries exhausted"
        );
        Ok(())
    }

    /// Publish a DLQ envelope through the provider outbox.
    async fn enqueue_dlq(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        source_event: &EventEnvelope,
        reason: &str,
        error_type: &str,
        retryable: bool,
        replay_topic: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let mut payload = json!({
            "reason": reason,
            "error_type": error_type,
            "retryable": retryable,
            "source": self.service_name,
            "source_event_id": source_event.event_id,
        });
        if let Some(topic) = replay_topic {
            payload["replay_topic"] = json!(topic);
            payload["failed_event"] = source_event.to_value();
        }

        let dlq = EventEnvelope::new(
            TOPIC_PAYMENTS_DLQ,
            &source_event.aggregate_id,
            &source_event.trace_id,
            payload,
        );
        enqueue_event(tx, "payment", TOPIC_PAYMENTS_DLQ, &dlq).await?;

        telemetry::DLQ_PUBLISHED_TOTAL
            .with_label_values(&[&self.service_name, TOPIC_PAYMENTS_DLQ, error_type])
            .inc();
        Ok(())
    }
}

#[derive(Debug)]
struct AuthorizePayload {
    customer_id: String,
}

/// Schema/semantic validation for provider authorize requests.
fn validate_authorize_payload(payload: &serde_json::Value) -> Result<AuthorizePayload, String> {
    let customer_id = payload
        .get("customer_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or("invalid customer_id")?;

    let currency_ok = payload
        .get("currency")
        .and_then(|v| v.as_str())
        .is_some_and(|c| c.len() == 3);
    if !currency_ok {
        return Err("invalid currency".to_string());
    }

    let amount_ok = payload
        .get("amount_cents")
        .and_then(|v| v.as_i64())
        .is_some_and(|a| a > 0);
    if !amount_ok {
        return Err("invalid amount_cents".to_string());
    }

    Ok(AuthorizePayload {
        customer_id: customer_id.to_string(),
    })
}

async fn insert_attempt(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: &str,
    attempt_number: i32,
    result: &str,
    latency_ms: i32,
    error_code: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO provider_attempts
            (attempt_id, payment_id, attempt_number, result, latency_ms, error_code)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(payment_id)
    .bind(attempt_number)
    .bind(result)
    .bind(latency_ms)
    .bind(error_code)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_well_formed_payload() {
        let payload = json!({
            "customer_id": "cust-1",
            "currency": "USD",
            "amount_cents": 5000
        });
        assert!(validate_authorize_payload(&payload).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_customer() {
        let payload = json!({"customer_id": "", "currency": "USD", "amount_cents": 100});
        assert_eq!(
            validate_authorize_payload(&payload).unwrap_err(),
            "invalid customer_id"
        );
    }

    #[test]
    fn test_validate_rejects_bad_currency() {
        let payload = json!({"customer_id": "c", "currency": "US", "amount_cents": 100});
        assert_eq!(
            validate_authorize_payload(&payload).unwrap_err(),
            "invalid currency"
        );
        let payload = json!({"customer_id": "c", "amount_cents": 100});
        assert!(validate_authorize_payload(&payload).is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        for amount in [json!(0), json!(-5), json!("5000"), json!(12.5)] {
            let payload = json!({"customer_id": "c", "currency": "USD", "amount_cents": amount});
            assert_eq!(
                validate_authorize_payload(&payload).unwrap_err(),
                "invalid amount_cents"
            );
        }
    }
}
