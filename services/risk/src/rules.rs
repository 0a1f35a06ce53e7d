//! Risk rule evaluation.
//!
//! The decision function is pure: counters come in from the KV store, the
//! verdict goes out. Rules apply in order, first match wins.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Deny,
    Review,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "APPROVE",
            Decision::Deny => "DENY",
            Decision::Review => "REVIEW",
        }
    }
}

/// Configurable rule thresholds.
#[derive(Debug, Clone)]
pub struct RiskThresholds {
    /// Requests per customer per hour before REVIEW.
    pub velocity_per_hour: i64,
    /// Amount above which a payment needs manual review.
    pub review_amount_cents: i64,
    /// Requests per hour above which a customer is denied outright.
    pub deny_frequency_threshold: i64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            velocity_per_hour: 20,
            review_amount_cents: 100_000,
            deny_frequency_threshold: 50,
        }
    }
}

/// Apply velocity/high-amount/failed-attempt rules, first match wins.
pub fn evaluate(
    thresholds: &RiskThresholds,
    velocity_count: i64,
    failed_attempts: i64,
    amount_cents: i64,
) -> (Decision, &'static str) {
    if velocity_count > thresholds.deny_frequency_threshold {
        return (Decision::Deny, "high_frequency");
    }
    if amount_cents > thresholds.review_amount_cents {
        return (Decision::Review, "high_amount");
    }
    if failed_attempts >= 3 {
        return (Decision::Review, "multiple_failed_attempts");
    }
    if velocity_count > thresholds.velocity_per_hour {
        return (Decision::Review, "velocity_threshold");
    }
    (Decision::Approve, "rule_passed")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> RiskThresholds {
        RiskThresholds::default()
    }

    #[test]
    fn test_normal_payment_approved() {
        assert_eq!(
            evaluate(&thresholds(), 1, 0, 5000),
            (Decision::Approve, "rule_passed")
        );
    }

    #[test]
    fn test_high_frequency_denied() {
        assert_eq!(
            evaluate(&thresholds(), 51, 0, 5000),
            (Decision::Deny, "high_frequency")
        );
        // Exactly at the threshold is still allowed through
        assert_ne!(evaluate(&thresholds(), 50, 0, 5000).0, Decision::Deny);
    }

    #[test]
    fn test_high_amount_reviewed() {
        assert_eq!(
            evaluate(&thresholds(), 1, 0, 200_000),
            (Decision::Review, "high_amount")
        );
        assert_eq!(evaluate(&thresholds(), 1, 0, 100_000).0, Decision::Approve);
    }

    #[test]
    fn test_failed_attempts_reviewed() {
        assert_eq!(
            evaluate(&thresholds(), 1, 3, 5000),
            (Decision::Review, "multiple_failed_attempts")
        );
        assert_eq!(evaluate(&thresholds(), 1, 2, 5000).0, Decision::Approve);
    }

    #[test]
    fn test_velocity_reviewed() {
        assert_eq!(
            evaluate(&thresholds(), 21, 0, 5000),
            (Decision::Review, "velocity_threshold")
        );
        assert_eq!(evaluate(&thresholds(), 20, 0, 5000).0, Decision::Approve);
    }

    #[test]
    fn test_rule_ordering_first_match_wins() {
        // Deny-frequency outranks the review rules even when they also match
        assert_eq!(
            evaluate(&thresholds(), 51, 5, 200_000),
            (Decision::Deny, "high_frequency")
        );
        // High amount outranks failed attempts and velocity
        assert_eq!(
            evaluate(&thresholds(), 25, 5, 200_000),
            (Decision::Review, "high_amount")
        );
        // Failed attempts outrank velocity
        assert_eq!(
            evaluate(&thresholds(), 25, 3, 5000),
            (Decision::Review, "multiple_failed_attempts")
        );
    }
}
