//! Shared exponential-backoff-with-jitter policy, consumed by the executor
//! and batch engine (spec §4.8) rather than duplicated per call site.

use std::time::Duration;

/// Parameters for retrying a backend call that failed with a retryable
/// error (throttling, unprocessed keys/items, transient transport failure).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fractional jitter applied symmetrically around the computed delay,
    /// e.g. `0.25` means ±25%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// The base delay (before jitter) for retry attempt `attempt` (0-indexed:
    /// the delay before the *first* retry, i.e. after the initial failure).
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Applies jitter deterministically from a caller-supplied `[0.0, 1.0)`
    /// sample, so the policy itself stays free of a `rand` dependency and is
    /// unit-testable without mocking randomness.
    pub fn jittered_delay(&self, attempt: u32, unit_sample: f64) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let spread = base.as_secs_f64() * self.jitter;
        let offset = (unit_sample * 2.0 - 1.0) * spread;
        let jittered = (base.as_secs_f64() + offset).max(0.0);
        Duration::from_secs_f64(jittered)
    }
}

/// How close to an ambient deadline (e.g. a function-invocation deadline) a
/// new call may start before the executor short-circuits with
/// `Transport(DeadlineImminent)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadlinePolicy {
    pub buffer: Duration,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            buffer: Duration::from_millis(100),
        }
    }
}

impl DeadlinePolicy {
    /// Whether a call starting `now` against `deadline` should short-circuit.
    pub fn is_imminent(&self, now: std::time::Instant, deadline: std::time::Instant) -> bool {
        deadline.saturating_duration_since(now) <= self.buffer
    }
}
