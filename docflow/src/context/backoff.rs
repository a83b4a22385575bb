//! Delay schedule between retry attempts.
//!
//! The default schedule has a zero base delay, so `with_retry` re-invokes a
//! failing step immediately. A positive base delay spaces attempts out with
//! the configured backoff and jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Delay schedule used between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoff {
    /// Base delay in milliseconds. Zero disables waiting.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 30_000,
            strategy: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryBackoff {
    /// Creates the immediate (no wait) schedule.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Creates an exponential schedule with full jitter.
    #[must_use]
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            strategy: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
            ..Self::default()
        }
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculates the delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        if base == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(attempt)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_immediate() {
        let backoff = RetryBackoff::default();
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(5), Duration::ZERO);
    }

    #[test]
    fn test_exponential_no_jitter() {
        let backoff = RetryBackoff::exponential(100).with_jitter(JitterStrategy::None);
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant() {
        let linear = RetryBackoff::exponential(100)
            .with_strategy(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let constant = linear.with_strategy(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for(7), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let backoff = RetryBackoff::exponential(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        assert_eq!(backoff.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let backoff = RetryBackoff::exponential(100).with_strategy(BackoffStrategy::Constant);
        for _ in 0..50 {
            assert!(backoff.delay_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_serde_defaults() {
        let backoff: RetryBackoff = serde_json::from_str(r#"{"base_delay_ms": 250}"#).unwrap();
        assert_eq!(backoff.base_delay_ms, 250);
        assert_eq!(backoff.strategy, BackoffStrategy::Exponential);
        assert_eq!(backoff.jitter, JitterStrategy::None);
    }
}
