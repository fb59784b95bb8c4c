//! Exponential backoff for automatic task retries.

use std::time::Duration;

use crate::id::TaskAttemptIndex;

/// Backoff schedule for the attempts of one retry cycle.
///
/// Install it on a task with [`Task::retry_policy`](super::Task::retry_policy).
/// The attempt at index `i` (0-based) is followed, if it fails, by a delay of
/// `min(base_delay * 2^i, max_delay)`. Once `max_attempts` attempts of the
/// cycle have failed, the task stays in error until it is retried by hand.
///
/// With the defaults, failures of attempts 0 to 3 wait 1s, 2s, 4s and 8s;
/// a failure of attempt 4 ends the cycle.
///
/// ```
/// use std::time::Duration;
/// use tideflow::id::TaskAttemptIndex;
/// use tideflow::worker::RetryPolicy;
///
/// let policy = RetryPolicy {
///     max_attempts: 3,
///     base_delay: Duration::from_millis(500),
///     ..Default::default()
/// };
/// assert_eq!(policy.delay_after(TaskAttemptIndex(1)), Some(Duration::from_secs(1)));
/// assert_eq!(policy.delay_after(TaskAttemptIndex(2)), None);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per retry cycle, the first one included. Default: 5.
    pub max_attempts: u32,
    /// Delay after the first failed attempt. Default: 1s.
    pub base_delay: Duration,
    /// Upper bound on any delay. Default: 5 minutes.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following a failed attempt at `index`.
    ///
    /// `None` once the cycle is exhausted.
    pub fn delay_after(&self, index: TaskAttemptIndex) -> Option<Duration> {
        if index.0.saturating_add(1) >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(index.0).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }

    /// [`delay_after`](Self::delay_after) in seconds, the unit retry-delay
    /// callbacks report.
    pub fn retry_delay(&self, index: TaskAttemptIndex) -> Option<f64> {
        self.delay_after(index).map(|delay| delay.as_secs_f64())
    }
}
