//! Bounded retry policy for polling a daemon that settles asynchronously.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// `base_delay * attempt`
    Linear,
}

/// A bounded retry policy.
///
/// `max_attempts` counts every try, including the first one, so a policy with
/// `max_attempts = 1` never sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts
    pub max_attempts: u32,
    /// Delay unit
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Growth function
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy that waits the same delay before every retry.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, base_delay: delay, backoff: Backoff::Fixed }
    }

    /// A policy whose delay grows linearly with the attempt count.
    #[must_use]
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay, backoff: Backoff::Linear }
    }

    /// Check that the policy allows at least one attempt.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRetryPolicy`] when `max_attempts` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidRetryPolicy("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt.max(1)),
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts have run.
    #[must_use]
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Blocking sleep, injectable so retry loops can run against a fake clock.
pub trait Sleeper: Send + Sync {
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(100));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(4), Duration::from_millis(100));
    }

    #[test]
    fn test_linear_delay_grows_with_attempt() {
        let policy = RetryPolicy::linear(10, Duration::from_millis(250));

        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(10));

        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let policy = RetryPolicy::fixed(0, Duration::from_millis(10));
        assert_matches!(policy.validate(), Err(Error::InvalidRetryPolicy(_)));
    }
}
