use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current state of a payment aggregate. Source of truth for the saga.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Payment {
    pub payment_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub state_version: i32,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable audit row for one state transition.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentTimeline {
    pub timeline_id: String,
    pub payment_id: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub reason: String,
    pub event_id: Option<uuid::Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Operational record of one provider authorization outcome.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentAttempt {
    pub attempt_id: String,
    pub payment_id: String,
    pub attempt_number: i32,
    pub result: String,
    pub latency_ms: i32,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payment creation payload accepted from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCreateRequest {
    pub customer_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
}

impl PaymentCreateRequest {
    /// Boundary validation mirroring the gateway contract.
    pub fn validate(&self) -> Result<(), String> {
        if self.customer_id.is_empty() {
            return Err("customer_id must be non-empty".to_string());
        }
        if self.amount_cents <= 0 {
            return Err("amount_cents must be positive".to_string());
        }
        if self.currency.len() != 3 {
            return Err("currency must be a three-letter code".to_string());
        }
        if self.idempotency_key.len() < 5 {
            return Err("idempotency_key must be at least 5 characters".to_string());
        }
        Ok(())
    }
}

/// Minimal payment view returned to clients and services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub status: String,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> PaymentCreateRequest {
        PaymentCreateRequest {
            customer_id: "cust-1".to_string(),
            amount_cents: 5000,
            currency: "USD".to_string(),
            idempotency_key: "key-1".to_string(),
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn test_empty_customer_rejected() {
        let mut req = valid_request();
        req.customer_id.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let mut req = valid_request();
        req.amount_cents = 0;
        assert!(req.validate().is_err());
        req.amount_cents = -500;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_currency_must_be_three_letters() {
        let mut req = valid_request();
        req.currency = "USDT".to_string();
        assert!(req.validate().is_err());
        req.currency = "US".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_short_idempotency_key_rejected() {
        let mut req = valid_request();
        req.idempotency_key = "abcd".to_string();
        assert!(req.validate().is_err());
    }
}
