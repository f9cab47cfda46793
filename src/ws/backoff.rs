//! Linear-capped retry backoff.
//!
//! The delay ramps linearly with the attempt number up to a cap, then stays
//! flat: `delay(n) = base_interval * min(n, cap_multiplier)`. The policy is
//! deterministic (no jitter), so retry timing is exactly predictable.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Attempt-bounded, linear-capped backoff policy.
///
/// Implements [`backoff::backoff::Backoff`] so the connection loop can drive
/// it the same way it would drive any other policy: [`Backoff::next_backoff`]
/// yields the delay for the next retry and `None` once the attempt budget is
/// exhausted; [`Backoff::reset`] restarts the cycle after a successful open.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_interval: Duration,
    cap_multiplier: u32,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    /// Create a policy with the given base interval, delay cap and attempt budget.
    #[must_use]
    pub fn new(base_interval: Duration, cap_multiplier: u32, max_attempts: u32) -> Self {
        Self {
            base_interval,
            cap_multiplier,
            max_attempts,
            attempt: 0,
        }
    }

    /// Pure delay function: `base_interval * min(attempt, cap_multiplier)`.
    ///
    /// `attempt` starts at 1 for the first retry. Monotonically non-decreasing
    /// and flat once `attempt` reaches `cap_multiplier`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_interval * attempt.min(self.cap_multiplier)
    }

    /// Number of retries handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.delay(self.attempt))
    }
}
