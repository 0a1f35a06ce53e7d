use chrono::{DateTime, Utc};
use serde::Serialize;

/// Logical account used for double-entry postings.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Account {
    pub account_id: String,
    pub account_type: String,
    pub balance_cents: i64,
}

/// Immutable debit/credit record for one transaction leg.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub transaction_id: String,
    pub account_id: String,
    pub direction: String,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// Per-transaction debit/credit sums used by reconciliation.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionSums {
    pub transaction_id: String,
    pub debits: i64,
    pub credits: i64,
    pub entry_count: i64,
}
