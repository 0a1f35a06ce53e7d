//! # Event Envelope
//!
//! Canonical event shape sent across saga topics. One envelope struct for
//! the whole platform so producers, the outbox publisher, and consumers all
//! agree on metadata placement.
//!
//! - `event_id`: unique identifier, the inbox deduplication key
//! - `event_type`: topic-shaped name of what happened
//! - `aggregate_id`: the payment this event belongs to
//! - `occurred_at`: ISO-8601 timestamp when the event was generated
//! - `trace_id`: correlation id propagated end-to-end from the gateway
//! - `payload`: event-specific data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard envelope wrapping every inter-service event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (inbox deduplication key).
    pub event_id: Uuid,

    /// What happened, named after the topic it travels on.
    pub event_type: String,

    /// Identity of the payment aggregate this event belongs to.
    pub aggregate_id: String,

    /// When the event was generated.
    pub occurred_at: DateTime<Utc>,

    /// Correlation id propagated from the original request.
    pub trace_id: String,

    /// Event-specific payload.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Create a new envelope with a fresh `event_id` and `occurred_at = now`.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        trace_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            occurred_at: Utc::now(),
            trace_id: trace_id.into(),
            payload,
        }
    }

    /// Create an envelope with an explicit event_id (useful for testing).
    pub fn with_event_id(
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        trace_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            occurred_at: Utc::now(),
            trace_id: trace_id.into(),
            payload,
        }
    }

    /// Serialize the envelope for storage or publishing.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("envelope serialization cannot fail")
    }
}

/// Validate envelope metadata before a consumer dispatches a message.
///
/// Checks that `event_id`, `event_type`, `aggregate_id`, `occurred_at`, and
/// `trace_id` are present non-empty strings (besides `occurred_at`, which
/// only has to be present). Returns a descriptive error otherwise.
pub fn validate_envelope_fields(envelope: &serde_json::Value) -> Result<(), String> {
    for field in ["event_id", "event_type", "aggregate_id", "trace_id"] {
        let value = envelope
            .get(field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("missing or invalid {field}"))?;
        if value.is_empty() {
            return Err(format!("{field} cannot be empty"));
        }
    }

    envelope
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .ok_or("missing or invalid occurred_at")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new(
            "payments.requested",
            "pay-123",
            "trace-456",
            json!({"amount_cents": 5000}),
        );

        assert_eq!(envelope.event_type, "payments.requested");
        assert_eq!(envelope.aggregate_id, "pay-123");
        assert_eq!(envelope.trace_id, "trace-456");
        assert_eq!(envelope.payload["amount_cents"], 5000);
    }

    #[test]
    fn test_envelope_round_trips_through_json() {
        let envelope = EventEnvelope::new("payments.captured", "pay-1", "t-1", json!({}));
        let value = envelope.to_value();
        let back: EventEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back.event_id, envelope.event_id);
        assert_eq!(back.event_type, "payments.captured");
    }

    #[test]
    fn test_validate_envelope_fields_valid() {
        let envelope = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "event_type": "risk.approved",
            "aggregate_id": "pay-1",
            "occurred_at": "2026-01-01T00:00:00Z",
            "trace_id": "trace-1",
            "payload": {}
        });

        assert!(validate_envelope_fields(&envelope).is_ok());
    }

    #[test]
    fn test_validate_envelope_fields_missing_trace_id() {
        let envelope = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "event_type": "risk.approved",
            "aggregate_id": "pay-1",
            "occurred_at": "2026-01-01T00:00:00Z"
        });

        assert!(validate_envelope_fields(&envelope).is_err());
    }

    #[test]
    fn test_validate_envelope_fields_empty_aggregate_id() {
        let envelope = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "event_type": "risk.approved",
            "aggregate_id": "",
            "occurred_at": "2026-01-01T00:00:00Z",
            "trace_id": "trace-1"
        });

        assert!(validate_envelope_fields(&envelope).is_err());
    }
}
