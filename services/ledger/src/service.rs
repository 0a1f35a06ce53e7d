//! Ledger posting logic with inbox/outbox reliability patterns.
//!
//! Every capture event posts one balanced pair of entries under
//! `transaction_id = "settlement:" + payment_id`. The balance check re-reads
//! the transaction's rows inside the same transaction; an imbalance is an
//! invariant violation that rolls everything back and surfaces loudly.

use event_bus::EventEnvelope;
use outbox::{enqueue_event, inbox_seen, mark_inbox};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::models::LedgerEntry;

pub const TOPIC_PAYMENTS_CAPTURED: &str = "payments.captured";
pub const TOPIC_PAYMENTS_SETTLED: &str = "payments.settled";

/// Bootstrapped chart of accounts.
const BOOTSTRAP_ACCOUNTS: &[(&str, &str)] = &[
    ("customer_cash", "CUSTOMER"),
    ("merchant_receivable", "MERCHANT"),
    ("platform_fee", "PLATFORM"),
    ("clearing", "CLEARING"),
];

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger imbalance detected for {transaction_id}: debits={debits} credits={credits}")]
    Imbalance {
        transaction_id: String,
        debits: i64,
        credits: i64,
    },

    #[error("invalid captured payload: {0}")]
    InvalidPayload(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Consumes `payments.captured` and posts balanced ledger entries.
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
    service_name: String,
}

impl LedgerService {
    pub fn new(pool: PgPool, service_name: impl Into<String>) -> Self {
        Self {
            pool,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Bootstrap required accounts; retries cover cold-start races while
    /// Postgres is still initializing.
    pub async fn ensure_accounts(&self) -> Result<(), sqlx::Error> {
        const RETRIES: u32 = 20;
        for attempt in 1..=RETRIES {
            match self.insert_bootstrap_accounts().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < RETRIES => {
                    tracing::warn!(
                        attempt = attempt,
                        retries = RETRIES,
                        error = %e,
                        "Ledger account bootstrap retry"
                    );
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn insert_bootstrap_accounts(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for (account_id, account_type) in BOOTSTRAP_ACCOUNTS {
            sqlx::query(
                r#"
                INSERT INTO accounts (account_id, account_type, balance_cents)
                VALUES ($1, $2, 0)
                ON CONFLICT (account_id) DO NOTHING
                "#,
            )
            .bind(account_id)
            .bind(account_type)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    /// Post settlement entries and emit `payments.settled`.
    pub async fn handle_captured(&self, event: &EventEnvelope) -> Result<(), LedgerError> {
        if inbox_seen(&self.pool, event.event_id, &self.service_name).await? {
            tracing::info!(
                topic = TOPIC_PAYMENTS_CAPTURED,
                event_id = %event.event_id,
                "Duplicate event skipped"
            );
            telemetry::DUPLICATE_EVENTS_SKIPPED_TOTAL
                .with_label_values(&[&self.service_name, TOPIC_PAYMENTS_CAPTURED])
                .inc();
            return Ok(());
        }

        let amount = event
            .payload
            .get("amount_cents")
            .and_then(|v| v.as_i64())
            .filter(|a| *a > 0)
            .ok_or_else(|| LedgerError::InvalidPayload("missing amount_cents".to_string()))?;

        let transaction_id = format!("settlement:{}", event.aggregate_id);

        let mut tx = self.pool.begin().await?;

        post_entry(&mut tx, &transaction_id, "customer_cash", "DEBIT", amount).await?;
        post_entry(
            &mut tx,
            &transaction_id,
            "merchant_receivable",
            "CREDIT",
            amount,
        )
        .await?;

        // Safety check: every transaction must balance debits and credits.
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT entry_id, transaction_id, account_id, direction, amount_cents, created_at
            FROM ledger_entries
            WHERE transaction_id = $1
            "#,
        )
        .bind(&transaction_id)
        .fetch_all(&mut *tx)
        .await?;

        let debits: i64 = entries
            .iter()
            .filter(|e| e.direction == "DEBIT")
            .map(|e| e.amount_cents)
            .sum();
        let credits: i64 = entries
            .iter()
            .filter(|e| e.direction == "CREDIT")
            .map(|e| e.amount_cents)
            .sum();
        if debits != credits {
            return Err(LedgerError::Imbalance {
                transaction_id,
                debits,
                credits,
            });
        }

        mark_inbox(&mut tx, event.event_id, &self.service_name).await?;

        let settled = EventEnvelope::new(
            TOPIC_PAYMENTS_SETTLED,
            &event.aggregate_id,
            &event.trace_id,
            json!({
                "transaction_id": &transaction_id,
                "amount_cents": amount,
            }),
        );
        enqueue_event(&mut tx, "payment", TOPIC_PAYMENTS_SETTLED, &settled).await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = %event.aggregate_id,
            transaction_id = %transaction_id,
            amount_cents = amount,
            "Settlement entries posted"
        );
        Ok(())
    }
}

/// Insert one ledger row and update the account balance snapshot.
///
/// DEBIT decreases the balance, CREDIT increases it.
async fn post_entry(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: &str,
    account_id: &str,
    direction: &str,
    amount_cents: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (entry_id, transaction_id, account_id, direction, amount_cents)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(transaction_id)
    .bind(account_id)
    .bind(direction)
    .bind(amount_cents)
    .execute(&mut **tx)
    .await?;

    let delta = if direction == "DEBIT" {
        -amount_cents
    } else {
        amount_cents
    };
    sqlx::query(
        r#"
        UPDATE accounts
        SET balance_cents = balance_cents + $1
        WHERE account_id = $2
        "#,
    )
    .bind(delta)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
