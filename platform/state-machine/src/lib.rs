//! # Payment State Machine
//!
//! Single source of truth for the payment lifecycle. The orchestrator owns
//! the aggregate, but the transition table lives here so workers and tests
//! validate against the same rules.
//!
//! ## Lifecycle
//!
//! ```text
//! CREATED     -> RISK_REVIEW | APPROVED | FAILED
//! RISK_REVIEW -> APPROVED | FAILED
//! APPROVED    -> AUTHORIZED | FAILED
//! AUTHORIZED  -> CAPTURED | FAILED | REVERSED
//! CAPTURED    -> SETTLED | FAILED | REVERSED
//! SETTLED     -> (terminal)
//! FAILED      -> REVERSED
//! REVERSED    -> (terminal)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current state of a payment aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    RiskReview,
    Approved,
    Authorized,
    Captured,
    Settled,
    Failed,
    Reversed,
}

impl PaymentStatus {
    /// States this status may legally transition into.
    pub fn allowed_targets(self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Created => &[RiskReview, Approved, Failed],
            RiskReview => &[Approved, Failed],
            Approved => &[Authorized, Failed],
            Authorized => &[Captured, Failed, Reversed],
            Captured => &[Settled, Failed, Reversed],
            Settled => &[],
            Failed => &[Reversed],
            Reversed => &[],
        }
    }

    /// Terminal states never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Settled | PaymentStatus::Failed | PaymentStatus::Reversed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Created => "CREATED",
            PaymentStatus::RiskReview => "RISK_REVIEW",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Settled => "SETTLED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Reversed => "REVERSED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(PaymentStatus::Created),
            "RISK_REVIEW" => Ok(PaymentStatus::RiskReview),
            "APPROVED" => Ok(PaymentStatus::Approved),
            "AUTHORIZED" => Ok(PaymentStatus::Authorized),
            "CAPTURED" => Ok(PaymentStatus::Captured),
            "SETTLED" => Ok(PaymentStatus::Settled),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REVERSED" => Ok(PaymentStatus::Reversed),
            other => Err(TransitionError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition: {from} -> {to}")]
    Invalid {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("unknown payment status: {0}")]
    UnknownStatus(String),
}

/// Validate one state transition against the allowed-transition table.
pub fn validate_transition(from: PaymentStatus, to: PaymentStatus) -> Result<(), TransitionError> {
    if from.allowed_targets().contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Invalid { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    #[test]
    fn test_happy_path_transitions_allowed() {
        for (from, to) in [
            (Created, Approved),
            (Approved, Authorized),
            (Authorized, Captured),
            (Captured, Settled),
        ] {
            assert!(validate_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn test_review_and_compensation_paths() {
        assert!(validate_transition(Created, RiskReview).is_ok());
        assert!(validate_transition(RiskReview, Approved).is_ok());
        assert!(validate_transition(RiskReview, Failed).is_ok());
        assert!(validate_transition(Failed, Reversed).is_ok());
        assert!(validate_transition(Captured, Reversed).is_ok());
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for terminal in [Settled, Reversed] {
            assert!(terminal.allowed_targets().is_empty());
            assert!(terminal.is_terminal());
        }
        // FAILED is terminal for users but still allows compensation.
        assert!(Failed.is_terminal());
        assert_eq!(Failed.allowed_targets(), &[Reversed]);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        for (from, to) in [
            (Settled, Failed),
            (Reversed, Created),
            (Created, Captured),
            (Approved, Settled),
            (Captured, Authorized),
        ] {
            assert_eq!(
                validate_transition(from, to),
                Err(TransitionError::Invalid { from, to })
            );
        }
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            Created, RiskReview, Approved, Authorized, Captured, Settled, Failed, Reversed,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&RiskReview).unwrap();
        assert_eq!(json, "\"RISK_REVIEW\"");
        let back: PaymentStatus = serde_json::from_str("\"CAPTURED\"").unwrap();
        assert_eq!(back, Captured);
    }
}
