//! Per-agent circuit breaker
//!
//! Trips when the rolling totals show `total_requests >= 5` with an
//! error rate above 0.5. While open, the availability predicate refuses
//! calls. Reset is lazy: the first availability query past the reset
//! deadline closes the circuit, and the next call acts as the probe.

use crate::types::AgentState;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Requests observed before the breaker may trip.
pub const MIN_REQUESTS_TO_TRIP: u64 = 5;
/// Error rate above which the breaker trips.
pub const TRIP_ERROR_RATE: f64 = 0.5;

/// Evaluate the breaker after an error was recorded. Arms the reset
/// timer when tripping.
pub fn evaluate(agent_id: &str, state: &mut AgentState, reset_after_ms: u64, now: DateTime<Utc>) {
    if state.circuit_open {
        return;
    }
    if state.total_requests >= MIN_REQUESTS_TO_TRIP && state.error_rate() > TRIP_ERROR_RATE {
        state.circuit_open = true;
        state.circuit_reset_at = Some(now + Duration::milliseconds(reset_after_ms as i64));
        warn!(
            "Circuit opened for agent {} ({}/{} errors, reset in {}ms)",
            agent_id, state.total_errors, state.total_requests, reset_after_ms
        );
    }
}

/// Close the circuit if the reset deadline has passed. Returns true when
/// the circuit is (now) closed. The error counters are cleared on reset
/// so the probe call starts a fresh window.
pub fn maybe_reset(agent_id: &str, state: &mut AgentState, now: DateTime<Utc>) -> bool {
    if !state.circuit_open {
        return true;
    }
    match state.circuit_reset_at {
        Some(reset_at) if now >= reset_at => {
            state.circuit_open = false;
            state.circuit_reset_at = None;
            state.total_requests = 0;
            state.total_errors = 0;
            info!("Circuit reset for agent {}; next call is a probe", agent_id);
            true
        }
        _ => false,
    }
}

/// Force-close the circuit (healthy check on a previously broken agent).
pub fn force_close(state: &mut AgentState) {
    if state.circuit_open {
        state.circuit_open = false;
        state.circuit_reset_at = None;
        state.total_requests = 0;
        state.total_errors = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_only_past_minimum_volume() {
        let mut state = AgentState::default();
        state.total_requests = 4;
        state.total_errors = 4;
        evaluate("a1", &mut state, 30_000, Utc::now());
        assert!(!state.circuit_open);

        state.total_requests = 5;
        state.total_errors = 4;
        evaluate("a1", &mut state, 30_000, Utc::now());
        assert!(state.circuit_open);
        assert!(state.circuit_reset_at.is_some());
    }

    #[test]
    fn does_not_trip_at_half_error_rate() {
        let mut state = AgentState::default();
        state.total_requests = 10;
        state.total_errors = 5;
        evaluate("a1", &mut state, 30_000, Utc::now());
        assert!(!state.circuit_open, "rate must exceed 0.5, not equal it");
    }

    #[test]
    fn reset_is_lazy_on_deadline() {
        let now = Utc::now();
        let mut state = AgentState::default();
        state.total_requests = 6;
        state.total_errors = 6;
        evaluate("a1", &mut state, 30_000, now);
        assert!(state.circuit_open);

        // Before the deadline the circuit stays open.
        assert!(!maybe_reset("a1", &mut state, now + Duration::seconds(10)));
        assert!(state.circuit_open);

        // Past the deadline it closes and counters clear for the probe.
        assert!(maybe_reset("a1", &mut state, now + Duration::seconds(31)));
        assert!(!state.circuit_open);
        assert_eq!(state.total_requests, 0);
        assert_eq!(state.total_errors, 0);
    }
}
