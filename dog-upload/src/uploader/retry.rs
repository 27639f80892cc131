use std::fmt::Debug;
use std::time::Duration;

use rand::Rng;

/// Decides how long to wait before retrying a transient failure
pub trait RetryPolicy: Send + Sync + Debug {
    /// Delay before retry `attempt` (the first retry is attempt 1)
    fn delay(&self, attempt: u32) -> Duration;
}

/// `base * 2^(attempt-1)` capped at `max`, optionally with jitter.
///
/// With jitter the delay is drawn uniformly from the upper half of the
/// computed backoff, so concurrent parts do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.base.saturating_mul(factor), self.max)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }

        let half = backoff / 2;
        let spread = (backoff - half).as_millis() as u64;
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

/// Same delay before every retry
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_until_capped() {
        let policy = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500)).without_jitter();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        let policy = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        for _ in 0..100 {
            let delay = policy.delay(3);
            assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn fixed_is_constant() {
        let policy = FixedBackoff::new(Duration::from_millis(250));
        assert_eq!(policy.delay(1), policy.delay(5));
    }
}
