//! Exponential retry backoff.
//!
//! Delays come from a non-jittered `backon` exponential sequence. The
//! dispatcher persists each one as an entry's `next_attempt_at` instead of
//! sleeping on it, so a retry survives restarts.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Past this many doublings every delay is at its cap.
const MAX_DOUBLINGS: usize = 31;

/// `base * 2^(attempt - 1)`, capped per priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Cap for emergency entries, which never stop retrying.
    pub emergency_max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(5 * 60),
            emergency_max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    fn schedule(&self, cap: Duration) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base.min(cap))
            .with_max_delay(cap)
            .with_factor(2.0)
            .with_max_times(MAX_DOUBLINGS + 1)
    }

    /// Delay before the next try after `attempt` failed attempts (1-based).
    pub fn delay(&self, attempt: u32, emergency: bool) -> Duration {
        let cap = if emergency { self.emergency_max } else { self.max };
        let step = usize::try_from(attempt.saturating_sub(1))
            .map_or(MAX_DOUBLINGS, |step| step.min(MAX_DOUBLINGS));
        self.schedule(cap).build().nth(step).unwrap_or(cap)
    }

    /// Absolute Unix-ms eligibility time for the next try.
    pub fn next_attempt_at(&self, now_ms: i64, attempt: u32, emergency: bool) -> i64 {
        let delay = i64::try_from(self.delay(attempt, emergency).as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(delay)
    }
}
