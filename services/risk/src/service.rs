//! Risk decision engine and manual-review orchestration.
//!
//! Rule inputs (velocity counter, failed-attempt count) come from the shared
//! KV store and are read *before* the database transaction opens; a KV
//! outage degrades to default inputs instead of blocking payments.

use async_trait::async_trait;
use chrono::Utc;
use event_bus::EventEnvelope;
use kv_store::KvStore;
use outbox::{enqueue_event, inbox_seen, mark_inbox};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::RiskReview;
use crate::rules::{evaluate, Decision, RiskThresholds};

pub const TOPIC_PAYMENTS_REQUESTED: &str = "payments.requested";
pub const TOPIC_RISK_APPROVED: &str = "risk.approved";
pub const TOPIC_RISK_DENIED: &str = "risk.denied";

const VELOCITY_WINDOW_SECONDS: u64 = 7200;

#[derive(Debug, thiserror::Error)]
pub enum ManualDecisionError {
    #[error("review not found")]
    NotFound,

    #[error("review already finalized with status={0}")]
    AlreadyFinalized(String),

    #[error("payment must be in RISK_REVIEW for manual decision (current={0})")]
    WrongPaymentState(String),

    #[error("payment not found in orchestrator")]
    PaymentNotFound,

    #[error("failed to validate payment status: {0}")]
    StatusCheck(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read access to the orchestrator's view of a payment, behind a trait so
/// tests can fake the HTTP dependency.
#[async_trait]
pub trait PaymentStatusClient: Send + Sync {
    async fn fetch_status(&self, payment_id: &str) -> Result<String, ManualDecisionError>;
}

/// Production status client calling the orchestrator HTTP API.
pub struct HttpOrchestratorClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpOrchestratorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentStatusClient for HttpOrchestratorClient {
    async fn fetch_status(&self, payment_id: &str) -> Result<String, ManualDecisionError> {
        let url = format!("{}/payments/{}", self.base_url, payment_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ManualDecisionError::StatusCheck(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ManualDecisionError::PaymentNotFound);
        }
        if resp.status().is_client_error() || resp.status().is_server_error() {
            return Err(ManualDecisionError::StatusCheck(format!(
                "status={}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ManualDecisionError::StatusCheck(e.to_string()))?;
        body.get("status")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ManualDecisionError::StatusCheck("orchestrator status response malformed".into())
            })
    }
}

/// Consumes `payments.requested` and emits risk outcomes.
#[derive(Clone)]
pub struct RiskService {
    pool: PgPool,
    kv: Arc<dyn KvStore>,
    status_client: Arc<dyn PaymentStatusClient>,
    thresholds: RiskThresholds,
    service_name: String,
}

impl RiskService {
    pub fn new(
        pool: PgPool,
        kv: Arc<dyn KvStore>,
        status_client: Arc<dyn PaymentStatusClient>,
        thresholds: RiskThresholds,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            kv,
            status_client,
            thresholds,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Evaluate a requested payment and enqueue the APPROVE/DENY/REVIEW
    /// outcome.
    pub async fn handle_payment_requested(
        &self,
        event: &EventEnvelope,
    ) -> Result<(), sqlx::Error> {
        if inbox_seen(&self.pool, event.event_id, &self.service_name).await? {
            tracing::info!(
                topic = TOPIC_PAYMENTS_REQUESTED,
                event_id = %event.event_id,
                "Duplicate event skipped"
            );
            telemetry::DUPLICATE_EVENTS_SKIPPED_TOTAL
                .with_label_values(&[&self.service_name, TOPIC_PAYMENTS_REQUESTED])
                .inc();
            return Ok(());
        }

        let customer_id = event
            .payload
            .get("customer_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let amount_cents = event
            .payload
            .get("amount_cents")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        if customer_id.is_empty() || amount_cents <= 0 {
            // Malformed request payloads are absorbed: the orchestrator
            // already validated at the boundary, so this is a spurious event.
            tracing::warn!(
                event_id = %event.event_id,
                aggregate_id = %event.aggregate_id,
                "Malformed payments.requested payload, absorbing"
            );
            let mut tx = self.pool.begin().await?;
            mark_inbox(&mut tx, event.event_id, &self.service_name).await?;
            tx.commit().await?;
            return Ok(());
        }

        // KV reads happen before the transaction opens.
        let (decision, reason) = self.rule_decision(&customer_id, amount_cents).await;
        let topic = match decision {
            Decision::Approve => TOPIC_RISK_APPROVED,
            Decision::Deny | Decision::Review => TOPIC_RISK_DENIED,
        };

        let mut tx = self.pool.begin().await?;

        if decision == Decision::Review {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM risk_reviews WHERE payment_id = $1)",
            )
            .bind(&event.aggregate_id)
            .fetch_one(&mut *tx)
            .await?;

            if !exists {
                sqlx::query(
                    r#"
                    INSERT INTO risk_reviews
                        (review_id, payment_id, customer_id, amount_cents, reason, status)
                    VALUES ($1, $2, $3, $4, $5, 'PENDING')
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&event.aggregate_id)
                .bind(&customer_id)
                .bind(amount_cents)
                .bind(reason)
                .execute(&mut *tx)
                .await?;
            }
        }

        let outcome = EventEnvelope::new(
            topic,
            &event.aggregate_id,
            &event.trace_id,
            json!({
                "decision": decision.as_str(),
                "reason": reason,
                "customer_id": customer_id,
            }),
        );
        enqueue_event(&mut tx, "payment", topic, &outcome).await?;
        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;
        tx.commit().await?;

        tracing::info!(
            payment_id = %event.aggregate_id,
            decision = decision.as_str(),
            reason = %reason,
            "Risk decision enqueued"
        );
        Ok(())
    }

    /// Compute rule inputs from the KV store. Failures degrade to defaults.
    async fn rule_decision(
        &self,
        customer_id: &str,
        amount_cents: i64,
    ) -> (Decision, &'static str) {
        let hour_key = Utc::now().format("%Y%m%d%H");
        let velocity_key = format!("velocity:{customer_id}:{hour_key}");

        let velocity_count = match self.kv.incr(&velocity_key).await {
            Ok(count) => {
                if let Err(e) = self.kv.expire(&velocity_key, VELOCITY_WINDOW_SECONDS).await {
                    tracing::warn!(error = %e, "Velocity window expiry failed");
                }
                count
            }
            Err(e) => {
                tracing::warn!(error = %e, "Velocity counter unavailable, defaulting to 1");
                1
            }
        };

        let failed_key = format!("failed_attempts:{customer_id}");
        let failed_attempts = match self.kv.get(&failed_key).await {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, "Failed-attempt counter unavailable, defaulting to 0");
                0
            }
        };

        evaluate(
            &self.thresholds,
            velocity_count,
            failed_attempts,
            amount_cents,
        )
    }

    /// Return review queue rows for ops tooling.
    pub async fn list_reviews(
        &self,
        status: &str,
        limit: i64,
    ) -> Result<Vec<RiskReview>, sqlx::Error> {
        sqlx::query_as::<_, RiskReview>(
            r#"
            SELECT review_id, payment_id, customer_id, amount_cents, reason, status,
                   reviewed_by, reviewed_at, decision_event_id, created_at
            FROM risk_reviews
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Finalize one review row and emit the corresponding risk event.
    pub async fn manual_decision(
        &self,
        payment_id: &str,
        decision: Decision,
        reviewed_by: &str,
        trace_id: &str,
    ) -> Result<RiskReview, ManualDecisionError> {
        let review = sqlx::query_as::<_, RiskReview>(
            r#"
            SELECT review_id, payment_id, customer_id, amount_cents, reason, status,
                   reviewed_by, reviewed_at, decision_event_id, created_at
            FROM risk_reviews
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ManualDecisionError::NotFound)?;

        if review.status != "PENDING" {
            return Err(ManualDecisionError::AlreadyFinalized(review.status));
        }

        let orchestrator_status = self.status_client.fetch_status(payment_id).await?;
        if orchestrator_status != "RISK_REVIEW" {
            return Err(ManualDecisionError::WrongPaymentState(orchestrator_status));
        }

        let (topic, reason, review_status) = match decision {
            Decision::Approve => (TOPIC_RISK_APPROVED, "manual_approve", "APPROVED"),
            _ => (TOPIC_RISK_DENIED, "manual_deny", "DENIED"),
        };
        let reviewed_at = Utc::now();

        let outcome = EventEnvelope::new(
            topic,
            payment_id,
            trace_id,
            json!({
                "decision": decision.as_str(),
                "reason": reason,
                "customer_id": review.customer_id,
                "reviewed_by": reviewed_by,
                "reviewed_at": reviewed_at,
                "review_status": review_status,
            }),
        );

        let mut tx = self.pool.begin().await?;
        enqueue_event(&mut tx, "payment", topic, &outcome).await?;

        let updated = sqlx::query_as::<_, RiskReview>(
            r#"
            UPDATE risk_reviews
            SET status = $1, reviewed_by = $2, reviewed_at = $3, decision_event_id = $4
            WHERE payment_id = $5 AND status = 'PENDING'
            RETURNING review_id, payment_id, customer_id, amount_cents, reason, status,
                      reviewed_by, reviewed_at, decision_event_id, created_at
            "#,
        )
        .bind(review_status)
        .bind(reviewed_by)
        .bind(reviewed_at)
        .bind(outcome.event_id)
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;

        // A concurrent reviewer may have finalized between the read and the
        // guarded update; that surfaces as zero updated rows.
        let Some(updated) = updated else {
            return Err(ManualDecisionError::AlreadyFinalized(
                "not PENDING".to_string(),
            ));
        };

        tx.commit().await?;

        tracing::info!(
            payment_id = %payment_id,
            decision = decision.as_str(),
            reviewed_by = %reviewed_by,
            "Manual review finalized"
        );
        Ok(updated)
    }
}
