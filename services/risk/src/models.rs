use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Manual review queue entry for payments parked in RISK_REVIEW.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RiskReview {
    pub review_id: String,
    pub payment_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub decision_event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Body required for manual approve/deny actions.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualReviewRequest {
    pub reviewed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
