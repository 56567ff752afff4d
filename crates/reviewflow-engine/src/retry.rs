//! Per-action retry policy
//!
//! Exponential backoff with jitter to avoid thundering herd when many
//! actions hit the same degraded dependency.

use std::time::Duration;

use rand::Rng;

/// Backoff configuration for retriable action failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Initial delay before the first retry
    pub initial_interval: Duration,

    /// Cap on the delay between retries
    pub max_interval: Duration,

    /// Multiplier applied per retry (2.0 = exponential doubling)
    pub backoff_coefficient: f64,

    /// Randomness factor in [0.0, 1.0]; 0.1 means ±10%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 1s initial, 60s cap, 2x growth, 10% jitter
    pub fn exponential() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Fixed interval between retries, no growth or jitter
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (1-based: the first retry is 1).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let policy = RetryPolicy::exponential().with_jitter(0.0);
        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(4));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::exponential()
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);
        assert_eq!(policy.delay_for_retry(10), Duration::from_secs(5));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_retry(5), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential().with_jitter(0.5);
        for retry in 1..=6 {
            let delay = policy.delay_for_retry(retry).as_secs_f64();
            let base = (2.0_f64.powi(retry as i32 - 1)).min(60.0);
            assert!(delay >= base * 0.5 - f64::EPSILON);
            assert!(delay <= base * 1.5 + f64::EPSILON);
        }
    }
}
