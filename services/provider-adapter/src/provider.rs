//! Provider outcome simulation.
//!
//! The outcome function sits behind a small trait so tests inject
//! deterministic gateways instead of seeding RNG state. The
//! `force-timeout*` / `force-decline*` customer-id prefixes are the
//! documented test hooks and must stay honored by every implementation.

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    Success,
    Timeout,
    Decline,
}

/// Decides the outcome of one authorization attempt.
pub trait ProviderGateway: Send + Sync {
    fn decide(&self, customer_id: &str, attempt_number: u32) -> ProviderOutcome;
}

/// Default gateway: honors the force hooks, otherwise draws a weighted
/// random outcome (SUCCESS 0.70, TIMEOUT 0.20, DECLINE 0.10).
#[derive(Debug, Default, Clone)]
pub struct SimulatedProvider;

impl SimulatedProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderGateway for SimulatedProvider {
    fn decide(&self, customer_id: &str, _attempt_number: u32) -> ProviderOutcome {
        let customer = customer_id.to_lowercase();
        if customer.starts_with("force-timeout") {
            return ProviderOutcome::Timeout;
        }
        if customer.starts_with("force-decline") {
            return ProviderOutcome::Decline;
        }

        let roll: f64 = rand::thread_rng().gen();
        if roll < 0.70 {
            ProviderOutcome::Success
        } else if roll < 0.90 {
            ProviderOutcome::Timeout
        } else {
            ProviderOutcome::Decline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_timeout_hook() {
        let gateway = SimulatedProvider::new();
        assert_eq!(
            gateway.decide("force-timeout-A", 1),
            ProviderOutcome::Timeout
        );
        assert_eq!(
            gateway.decide("FORCE-TIMEOUT-other", 2),
            ProviderOutcome::Timeout,
            "hook is case-insensitive"
        );
    }

    #[test]
    fn test_force_decline_hook() {
        let gateway = SimulatedProvider::new();
        assert_eq!(
            gateway.decide("force-decline-A", 1),
            ProviderOutcome::Decline
        );
        assert_eq!(
            gateway.decide("Force-Decline-B", 3),
            ProviderOutcome::Decline
        );
    }

    #[test]
    fn test_random_outcomes_are_well_formed() {
        let gateway = SimulatedProvider::new();
        let mut seen_success = false;
        for _ in 0..200 {
            match gateway.decide("cust-normal", 1) {
                ProviderOutcome::Success => seen_success = true,
                ProviderOutcome::Timeout | ProviderOutcome::Decline => {}
            }
        }
        // SUCCESS carries 70% weight; 200 draws without one would be
        // astronomically unlikely.
        assert!(seen_success);
    }
}
