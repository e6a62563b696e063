//! Exponential backoff with jitter

use crate::types::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Delay before retry `attempt` (1-based):
/// `min(max_delay, initial · multiplier^(attempt−1))` scaled by a jitter
/// factor uniform in [0.75, 1.25].
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base = policy.initial_delay_ms as f64 * policy.multiplier.powi(exponent);
    let capped = base.min(policy.max_delay_ms as f64);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((capped * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            retryable_statuses: Vec::new(),
        }
    }

    #[test]
    fn delay_stays_within_jitter_bounds() {
        let policy = policy();
        for attempt in 1..=5u32 {
            let base = 100.0 * 2.0_f64.powi(attempt as i32 - 1);
            let expected = base.min(10_000.0);
            for _ in 0..50 {
                let delay = backoff_delay(&policy, attempt).as_millis() as f64;
                assert!(
                    delay >= expected * 0.75 - 1.0 && delay <= expected * 1.25 + 1.0,
                    "attempt {} delay {}ms outside [{}, {}]",
                    attempt,
                    delay,
                    expected * 0.75,
                    expected * 1.25
                );
            }
        }
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy {
            initial_delay_ms: 1_000,
            max_delay_ms: 2_000,
            multiplier: 10.0,
            ..policy()
        };
        for _ in 0..50 {
            let delay = backoff_delay(&policy, 4).as_millis();
            assert!(delay <= 2_500, "capped delay exceeded jittered max: {}", delay);
        }
    }
}
