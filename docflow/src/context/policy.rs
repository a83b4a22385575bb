//! Tunable knobs the combinators read from a context.

use super::RetryBackoff;
use crate::cache::StepCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a document is good enough to stop early.
pub type StopCondition<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// The serializable part of a [`Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Additional attempts `with_retry` makes after an `error` pause.
    pub retries: u32,
    /// Soft deadline for `with_timeout`, in milliseconds. `<= 0` disables it.
    pub timeout_ms: i64,
    /// Delay schedule between retries.
    pub backoff: RetryBackoff,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout_ms: 0,
            backoff: RetryBackoff::default(),
        }
    }
}

/// Retry, timeout, cache and stop-condition settings shared by every step of
/// a pipeline.
pub struct Policy<T> {
    /// Additional attempts `with_retry` makes after an `error` pause.
    pub retries: u32,
    /// Soft deadline for `with_timeout`, in milliseconds. `<= 0` disables it.
    pub timeout_ms: i64,
    /// Delay schedule between retries.
    pub backoff: RetryBackoff,
    /// Memoization service for `with_cache`. `None` runs unmemoized.
    pub cache: Option<Arc<dyn StepCache<T>>>,
    /// Fallback acceptance predicate for `with_alternatives`.
    pub stop_condition: Option<StopCondition<T>>,
}

impl<T> Default for Policy<T> {
    fn default() -> Self {
        Self::from_config(PolicyConfig::default())
    }
}

impl<T> Clone for Policy<T> {
    fn clone(&self) -> Self {
        Self {
            retries: self.retries,
            timeout_ms: self.timeout_ms,
            backoff: self.backoff,
            cache: self.cache.clone(),
            stop_condition: self.stop_condition.clone(),
        }
    }
}

impl<T> fmt::Debug for Policy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("retries", &self.retries)
            .field("timeout_ms", &self.timeout_ms)
            .field("backoff", &self.backoff)
            .field("cache", &self.cache.is_some())
            .field("stop_condition", &self.stop_condition.is_some())
            .finish()
    }
}

impl<T> Policy<T> {
    /// Creates a policy with no retries, no timeout and no cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy from its serializable settings.
    #[must_use]
    pub fn from_config(config: PolicyConfig) -> Self {
        Self {
            retries: config.retries,
            timeout_ms: config.timeout_ms,
            backoff: config.backoff,
            cache: None,
            stop_condition: None,
        }
    }

    /// Returns the serializable settings.
    #[must_use]
    pub fn config(&self) -> PolicyConfig {
        PolicyConfig {
            retries: self.retries,
            timeout_ms: self.timeout_ms,
            backoff: self.backoff,
        }
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the timeout in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the retry backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the cache service.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn StepCache<T>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the stop condition.
    #[must_use]
    pub fn with_stop_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.stop_condition = Some(Arc::new(condition));
        self
    }

    /// Returns the timeout, or `None` when disabled.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[test]
    fn test_default_policy() {
        let policy: Policy<String> = Policy::new();
        assert_eq!(policy.retries, 0);
        assert_eq!(policy.timeout(), None);
        assert!(policy.cache.is_none());
        assert!(policy.stop_condition.is_none());
    }

    #[test]
    fn test_timeout_disabled_when_not_positive() {
        let policy: Policy<()> = Policy::new().with_timeout_ms(0);
        assert_eq!(policy.timeout(), None);
        let policy: Policy<()> = Policy::new().with_timeout_ms(-5);
        assert_eq!(policy.timeout(), None);
        let policy: Policy<()> = Policy::new().with_timeout_ms(250);
        assert_eq!(policy.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_builder_and_config_round_trip() {
        let cache: Arc<dyn StepCache<i32>> = Arc::new(InMemoryCache::new());
        let policy = Policy::new()
            .with_retries(3)
            .with_timeout_ms(1000)
            .with_cache(cache)
            .with_stop_condition(|n: &i32| *n > 10);

        assert!(policy.cache.is_some());
        assert!(policy.stop_condition.as_ref().is_some_and(|stop| stop(&11)));

        let config = policy.config();
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout_ms, 1000);

        let json = serde_json::to_value(config).unwrap();
        let back: PolicyConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_config_deserializes_partial() {
        let config: PolicyConfig = serde_json::from_str(r#"{"retries": 2}"#).unwrap();
        assert_eq!(config.retries, 2);
        assert_eq!(config.timeout_ms, 0);
    }

    #[test]
    fn test_clone_shares_cache() {
        let cache: Arc<dyn StepCache<i32>> = Arc::new(InMemoryCache::new());
        let policy = Policy::new().with_cache(Arc::clone(&cache));
        let cloned = policy.clone();
        assert!(Arc::ptr_eq(
            policy.cache.as_ref().unwrap(),
            cloned.cache.as_ref().unwrap()
        ));
    }
}
