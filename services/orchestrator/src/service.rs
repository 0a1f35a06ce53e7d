//! Saga orchestration logic.
//!
//! Coordinates state transitions, emits next-step events, enforces
//! idempotency via inbox/outbox, and records timeline rows plus terminal
//! latency metrics. Every handler commits its business mutation, its
//! produced events, and its inbox marker in one transaction.

use chrono::Utc;
use event_bus::EventEnvelope;
use outbox::{enqueue_event, inbox_seen, mark_inbox};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use state_machine::{validate_transition, PaymentStatus, TransitionError};
use uuid::Uuid;

use crate::models::{Payment, PaymentCreateRequest};

pub const TOPIC_PAYMENTS_REQUESTED: &str = "payments.requested";
pub const TOPIC_RISK_APPROVED: &str = "risk.approved";
pub const TOPIC_RISK_DENIED: &str = "risk.denied";
pub const TOPIC_AUTHORIZE_REQUESTED: &str = "provider.authorize.requested";
pub const TOPIC_PAYMENTS_AUTHORIZED: &str = "payments.authorized";
pub const TOPIC_PAYMENTS_FAILED: &str = "payments.failed";
pub const TOPIC_PAYMENTS_CAPTURED: &str = "payments.captured";
pub const TOPIC_PAYMENTS_SETTLED: &str = "payments.settled";
pub const TOPIC_PAYMENTS_REVERSED: &str = "payments.reversed";

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("optimistic concurrency conflict for payment {payment_id} (expected version {expected_version})")]
    ConcurrencyConflict {
        payment_id: String,
        expected_version: i32,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Owns payment state machine progression and saga orchestration.
#[derive(Clone)]
pub struct OrchestratorService {
    pool: PgPool,
    service_name: String,
}

impl OrchestratorService {
    pub fn new(pool: PgPool, service_name: impl Into<String>) -> Self {
        Self {
            pool,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Create a payment row once per idempotency key and enqueue the first
    /// saga event. Returns the existing payment on a repeated key.
    pub async fn create_payment(
        &self,
        req: &PaymentCreateRequest,
        trace_id: &str,
    ) -> Result<Payment, OrchestratorError> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = fetch_by_idempotency_key(&mut tx, &req.idempotency_key).await? {
            tx.commit().await?;
            return Ok(existing);
        }

        let payment_id = Uuid::new_v4().to_string();
        let currency = req.currency.to_uppercase();

        let insert = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments
                (payment_id, customer_id, amount_cents, currency, status, state_version, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, 0, $6)
            RETURNING payment_id, customer_id, amount_cents, currency, status, state_version,
                      idempotency_key, created_at, updated_at
            "#,
        )
        .bind(&payment_id)
        .bind(&req.customer_id)
        .bind(req.amount_cents)
        .bind(&currency)
        .bind(PaymentStatus::Created.as_str())
        .bind(&req.idempotency_key)
        .fetch_one(&mut *tx)
        .await;

        let payment = match insert {
            Ok(payment) => payment,
            Err(e) if is_idempotency_conflict(&e) => {
                // Lost a create race; the winner's row is the answer.
                drop(tx);
                let mut tx = self.pool.begin().await?;
                let existing = fetch_by_idempotency_key(&mut tx, &req.idempotency_key)
                    .await?
                    .ok_or(OrchestratorError::Database(e))?;
                tx.commit().await?;
                return Ok(existing);
            }
            Err(e) => return Err(e.into()),
        };

        insert_timeline(
            &mut tx,
            &payment.payment_id,
            None,
            PaymentStatus::Created,
            "payment_created",
            None,
        )
        .await?;

        let envelope = EventEnvelope::new(
            TOPIC_PAYMENTS_REQUESTED,
            &payment.payment_id,
            trace_id,
            json!({
                "customer_id": payment.customer_id,
                "amount_cents": payment.amount_cents,
                "currency": payment.currency,
            }),
        );
        enqueue_event(&mut tx, "payment", TOPIC_PAYMENTS_REQUESTED, &envelope).await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = %payment.payment_id,
            customer_id = %payment.customer_id,
            amount_cents = payment.amount_cents,
            "Payment created"
        );

        Ok(payment)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, customer_id, amount_cents, currency, status, state_version,
                   idempotency_key, created_at, updated_at
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Move a payment forward after risk approval and request provider
    /// authorization.
    pub async fn handle_risk_approved(
        &self,
        event: &EventEnvelope,
    ) -> Result<(), OrchestratorError> {
        if self.skip_if_duplicate(event, TOPIC_RISK_APPROVED).await? {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let Some(mut payment) = fetch_payment(&mut tx, &event.aggregate_id).await? else {
            return self.absorb_unknown_payment(tx, event).await;
        };

        self.transition(
            &mut tx,
            &mut payment,
            PaymentStatus::Approved,
            "risk_approved",
            Some(event.event_id),
        )
        .await?;
        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;

        let authorize = EventEnvelope::new(
            TOPIC_AUTHORIZE_REQUESTED,
            &payment.payment_id,
            &event.trace_id,
            json!({
                "amount_cents": payment.amount_cents,
                "currency": payment.currency,
                "customer_id": payment.customer_id,
            }),
        );
        enqueue_event(&mut tx, "payment", TOPIC_AUTHORIZE_REQUESTED, &authorize).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Handle DENY/REVIEW decisions from the risk service.
    pub async fn handle_risk_denied(
        &self,
        event: &EventEnvelope,
    ) -> Result<(), OrchestratorError> {
        if self.skip_if_duplicate(event, TOPIC_RISK_DENIED).await? {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let Some(mut payment) = fetch_payment(&mut tx, &event.aggregate_id).await? else {
            return self.absorb_unknown_payment(tx, event).await;
        };

        let review = event.payload.get("decision").and_then(|d| d.as_str()) == Some("REVIEW");
        let (target, reason) = if review {
            (PaymentStatus::RiskReview, "risk_review_required")
        } else {
            (PaymentStatus::Failed, "risk_denied")
        };

        self.transition(&mut tx, &mut payment, target, reason, Some(event.event_id))
            .await?;
        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;
        tx.commit().await?;

        if target == PaymentStatus::Failed {
            self.observe_terminal(&payment, PaymentStatus::Failed);
            telemetry::PAYMENT_FAILURE_TOTAL
                .with_label_values(&[&self.service_name])
                .inc();
        }
        Ok(())
    }

    /// Record a successful authorization, capture in the same step, and
    /// request ledger settlement.
    pub async fn handle_authorized(
        &self,
        event: &EventEnvelope,
    ) -> Result<(), OrchestratorError> {
        if self
            .skip_if_duplicate(event, TOPIC_PAYMENTS_AUTHORIZED)
            .await?
        {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let Some(mut payment) = fetch_payment(&mut tx, &event.aggregate_id).await? else {
            return self.absorb_unknown_payment(tx, event).await;
        };

        // Two transitions share one event_id; the timeline keeps both rows.
        self.transition(
            &mut tx,
            &mut payment,
            PaymentStatus::Authorized,
            "provider_authorized",
            Some(event.event_id),
        )
        .await?;
        self.transition(
            &mut tx,
            &mut payment,
            PaymentStatus::Captured,
            "capture_requested",
            Some(event.event_id),
        )
        .await?;

        insert_attempt(
            &mut tx,
            &payment.payment_id,
            attempt_number(&event.payload),
            "AUTHORIZED",
            latency_ms(&event.payload),
            None,
        )
        .await?;

        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;

        let captured = EventEnvelope::new(
            TOPIC_PAYMENTS_CAPTURED,
            &payment.payment_id,
            &event.trace_id,
            json!({
                "amount_cents": payment.amount_cents,
                "currency": payment.currency,
                "customer_id": payment.customer_id,
            }),
        );
        enqueue_event(&mut tx, "payment", TOPIC_PAYMENTS_CAPTURED, &captured).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Handle provider failures; terminal timeouts compensate by reversing.
    pub async fn handle_failed(&self, event: &EventEnvelope) -> Result<(), OrchestratorError> {
        if self.skip_if_duplicate(event, TOPIC_PAYMENTS_FAILED).await? {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let Some(mut payment) = fetch_payment(&mut tx, &event.aggregate_id).await? else {
            return self.absorb_unknown_payment(tx, event).await;
        };

        let error_code = event
            .payload
            .get("error_code")
            .and_then(|c| c.as_str())
            .unwrap_or("UNKNOWN")
            .to_string();

        if payment.status != PaymentStatus::Failed.as_str() {
            self.transition(
                &mut tx,
                &mut payment,
                PaymentStatus::Failed,
                &format!("provider_failed:{error_code}"),
                Some(event.event_id),
            )
            .await?;
        }

        insert_attempt(
            &mut tx,
            &payment.payment_id,
            attempt_number(&event.payload),
            "FAILED",
            latency_ms(&event.payload),
            Some(&error_code),
        )
        .await?;

        // Compensation path: a terminal provider timeout is auto-reversed.
        if error_code == "PROVIDER_TIMEOUT" {
            self.transition(
                &mut tx,
                &mut payment,
                PaymentStatus::Reversed,
                "provider_timeout_compensation",
                Some(event.event_id),
            )
            .await?;

            let reversed = EventEnvelope::new(
                TOPIC_PAYMENTS_REVERSED,
                &payment.payment_id,
                &event.trace_id,
                json!({
                    "reason": "provider_timeout_compensation",
                    "source_event_id": event.event_id,
                }),
            );
            enqueue_event(&mut tx, "payment", TOPIC_PAYMENTS_REVERSED, &reversed).await?;
        }

        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;
        tx.commit().await?;

        let terminal: PaymentStatus = payment
            .status
            .parse()
            .unwrap_or(PaymentStatus::Failed);
        self.observe_terminal(&payment, terminal);
        telemetry::PAYMENT_FAILURE_TOTAL
            .with_label_values(&[&self.service_name])
            .inc();
        Ok(())
    }

    /// Mark a payment as SETTLED after the ledger posts balanced entries.
    pub async fn handle_settled(&self, event: &EventEnvelope) -> Result<(), OrchestratorError> {
        if self
            .skip_if_duplicate(event, TOPIC_PAYMENTS_SETTLED)
            .await?
        {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let Some(mut payment) = fetch_payment(&mut tx, &event.aggregate_id).await? else {
            return self.absorb_unknown_payment(tx, event).await;
        };

        self.transition(
            &mut tx,
            &mut payment,
            PaymentStatus::Settled,
            "ledger_settled",
            Some(event.event_id),
        )
        .await?;
        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;
        tx.commit().await?;

        self.observe_terminal(&payment, PaymentStatus::Settled);
        telemetry::PAYMENT_SUCCESS_TOTAL
            .with_label_values(&[&self.service_name])
            .inc();
        Ok(())
    }

    /// Apply one validated state transition with optimistic concurrency.
    ///
    /// The write is guarded by `(payment_id, status, state_version)`; a
    /// stale concurrent update affects zero rows and surfaces as
    /// `ConcurrencyConflict`, rolling back the whole handler transaction.
    async fn transition(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment: &mut Payment,
        new_status: PaymentStatus,
        reason: &str,
        event_id: Option<Uuid>,
    ) -> Result<(), OrchestratorError> {
        let from: PaymentStatus = payment.status.parse()?;
        validate_transition(from, new_status)?;

        let current_version = payment.state_version;
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1, state_version = $2, updated_at = $3
            WHERE payment_id = $4 AND status = $5 AND state_version = $6
            "#,
        )
        .bind(new_status.as_str())
        .bind(current_version + 1)
        .bind(Utc::now())
        .bind(&payment.payment_id)
        .bind(from.as_str())
        .bind(current_version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(OrchestratorError::ConcurrencyConflict {
                payment_id: payment.payment_id.clone(),
                expected_version: current_version,
            });
        }

        payment.status = new_status.as_str().to_string();
        payment.state_version = current_version + 1;

        insert_timeline(
            tx,
            &payment.payment_id,
            Some(from),
            new_status,
            reason,
            event_id,
        )
        .await?;

        tracing::info!(
            payment_id = %payment.payment_id,
            from = %from,
            to = %new_status,
            reason = %reason,
            "Payment transitioned"
        );

        Ok(())
    }

    async fn skip_if_duplicate(
        &self,
        event: &EventEnvelope,
        topic: &str,
    ) -> Result<bool, OrchestratorError> {
        if inbox_seen(&self.pool, event.event_id, &self.service_name).await? {
            tracing::info!(
                topic = %topic,
                event_id = %event.event_id,
                "Duplicate event skipped"
            );
            telemetry::DUPLICATE_EVENTS_SKIPPED_TOTAL
                .with_label_values(&[&self.service_name, topic])
                .inc();
            return Ok(true);
        }
        Ok(false)
    }

    /// Unknown aggregate: still record the inbox row so the spurious event
    /// is absorbed instead of redelivered forever.
    async fn absorb_unknown_payment(
        &self,
        mut tx: Transaction<'_, Postgres>,
        event: &EventEnvelope,
    ) -> Result<(), OrchestratorError> {
        tracing::warn!(
            event_id = %event.event_id,
            aggregate_id = %event.aggregate_id,
            event_type = %event.event_type,
            "Event references unknown payment, absorbing"
        );
        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;
        tx.commit().await?;
        Ok(())
    }

    fn observe_terminal(&self, payment: &Payment, terminal: PaymentStatus) {
        let elapsed = (Utc::now() - payment.created_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        telemetry::PAYMENT_E2E_SECONDS
            .with_label_values(&[&self.service_name, terminal.as_str()])
            .observe(elapsed);
    }
}

async fn fetch_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT payment_id, customer_id, amount_cents, currency, status, state_version,
               idempotency_key, created_at, updated_at
        FROM payments
        WHERE payment_id = $1
        "#,
    )
    .bind(payment_id)
    .fetch_optional(&mut **tx)
    .await
}

async fn fetch_by_idempotency_key(
    tx: &mut Transaction<'_, Postgres>,
    idempotency_key: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT payment_id, customer_id, amount_cents, currency, status, state_version,
               idempotency_key, created_at, updated_at
        FROM payments
        WHERE idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(&mut **tx)
    .await
}

async fn insert_timeline(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: &str,
    from_state: Option<PaymentStatus>,
    to_state: PaymentStatus,
    reason: &str,
    event_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_timeline
            (timeline_id, payment_id, from_state, to_state, reason, event_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(payment_id)
    .bind(from_state.map(|s| s.as_str()))
    .bind(to_state.as_str())
    .bind(reason)
    .bind(event_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
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
        INSERT INTO payment_attempts
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

fn is_idempotency_conflict(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.constraint() == Some("uq_payments_idempotency_key")
    )
}

fn attempt_number(payload: &serde_json::Value) -> i32 {
    payload
        .get("attempt_number")
        .and_then(|n| n.as_i64())
        .unwrap_or(1) as i32
}

fn latency_ms(payload: &serde_json::Value) -> i32 {
    payload
        .get("latency_ms")
        .and_then(|n| n.as_i64())
        .unwrap_or(0) as i32
}
