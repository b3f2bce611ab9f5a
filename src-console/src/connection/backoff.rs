//! Reconnection delay policy.

use std::time::Duration;

/// Delay unit for the first retry step.
pub const BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Upper bound on the delay between attempts.
pub const BACKOFF_CAP: Duration = Duration::from_millis(30_000);

/// Delay before reconnect attempt `attempt` (1-based): `min(1000 * 2^attempt, 30000)` ms.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let ms = (BACKOFF_BASE.as_millis() as u64)
        .saturating_mul(factor)
        .min(BACKOFF_CAP.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Retry counter driving `backoff_delay`.
#[derive(Debug, Default, Clone)]
pub struct Backoff {
    attempts: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        backoff_delay(self.attempts)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
