// crates/tether-client/src/reconnect.rs
// Pure backoff policy for stream reconnects

use std::time::Duration;

use crate::config::CadenceProfile;

/// Doubling stops after the fourth consecutive failure.
const MAX_BACKOFF_EXPONENT: u32 = 3;

/// Delay before reconnect attempt `attempt` (1-based, counting consecutive
/// failures since the last successful connect):
/// `min(base * 2^min(attempt-1, 3), max)`. Attempt 0 is treated as 1.
pub fn retry_delay(attempt: u32, profile: &CadenceProfile) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let delay_ms = profile
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(profile.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Consecutive-failure counter for the stream connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconnectState {
    /// Failures since the last successful connect
    pub attempt: u32,
    /// False once the owner asked for streaming to stop
    pub active: bool,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the new 1-based attempt count.
    pub fn record_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Reset the failure counter after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(base: u64, max: u64) -> CadenceProfile {
        CadenceProfile {
            base_delay_ms: base,
            max_delay_ms: max,
            reconciliation_debounce_ms: 0,
        }
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let p = profile(1_000, 10_000);
        assert_eq!(retry_delay(1, &p), Duration::from_millis(1_000));
        assert_eq!(retry_delay(2, &p), Duration::from_millis(2_000));
        assert_eq!(retry_delay(3, &p), Duration::from_millis(4_000));
        assert_eq!(retry_delay(4, &p), Duration::from_millis(8_000));
        assert_eq!(retry_delay(5, &p), Duration::from_millis(10_000));
        assert_eq!(retry_delay(50, &p), Duration::from_millis(10_000));
    }

    #[test]
    fn test_delay_is_non_decreasing_and_bounded() {
        let p = profile(700, 9_999);
        let mut previous = Duration::ZERO;
        for attempt in 1..=32 {
            let delay = retry_delay(attempt, &p);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            assert!(delay <= Duration::from_millis(p.max_delay_ms));
            previous = delay;
        }
    }

    #[test]
    fn test_attempt_zero_clamps_to_first_delay() {
        let p = profile(1_000, 10_000);
        assert_eq!(retry_delay(0, &p), retry_delay(1, &p));
    }

    #[test]
    fn test_exponent_stops_growing_after_fourth_failure() {
        let p = profile(100, u64::MAX);
        assert_eq!(retry_delay(4, &p), retry_delay(9, &p));
    }

    #[test]
    fn test_reset_after_success() {
        let p = profile(1_000, 10_000);
        let mut state = ReconnectState::new();
        for _ in 0..7 {
            state.record_failure();
        }
        state.reset();
        // The next failure after a successful connect starts over at attempt 1.
        let attempt = state.record_failure();
        assert_eq!(attempt, 1);
        assert_eq!(retry_delay(attempt, &p), Duration::from_millis(1_000));
    }
}
