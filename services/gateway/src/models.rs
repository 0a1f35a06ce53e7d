use serde::{Deserialize, Serialize};

/// Payload accepted by `POST /payments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub customer_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
}

impl PaymentRequest {
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

    fn valid() -> PaymentRequest {
        PaymentRequest {
            customer_id: "cust-1".to_string(),
            amount_cents: 5000,
            currency: "USD".to_string(),
            idempotency_key: "key-12345".to_string(),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejections() {
        let mut req = valid();
        req.customer_id.clear();
        assert!(req.validate().is_err());

        let mut req = valid();
        req.amount_cents = -1;
        assert!(req.validate().is_err());

        let mut req = valid();
        req.currency = "USDC".to_string();
        assert!(req.validate().is_err());

        let mut req = valid();
        req.idempotency_key = "k1".to_string();
        assert!(req.validate().is_err());
    }
}
