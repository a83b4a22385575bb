//! Memoizes successful step results in the context's cache.

use crate::context::PolicyContext;
use crate::core::{Outcome, StepResult};
use crate::steps::Step;
use async_trait::async_trait;
use std::fmt;
use tracing::debug;

/// Looks a document up in `policy.cache` before running the step.
///
/// A hit returns the cached document without running the step. A miss runs
/// the step and stores the result only when it is not a pause. Without a
/// configured cache the step runs unmemoized.
pub struct WithCache<S, K> {
    inner: S,
    key_fn: K,
}

impl<S, K> WithCache<S, K> {
    /// Wraps `inner`, keying entries with `key_fn`.
    pub const fn new(inner: S, key_fn: K) -> Self {
        Self { inner, key_fn }
    }
}

impl<S: fmt::Debug, K> fmt::Debug for WithCache<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithCache")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// Memoizes `step` under keys derived by `key_fn`.
///
/// [`crate::cache::cache_key`] is a convenient `key_fn` for serializable
/// documents.
pub const fn with_cache<S, K>(step: S, key_fn: K) -> WithCache<S, K> {
    WithCache::new(step, key_fn)
}

#[async_trait]
impl<C, T, S, K> Step<C, T> for WithCache<S, K>
where
    C: PolicyContext<T>,
    T: Clone + Send + Sync,
    S: Step<C, T>,
    K: Fn(&T) -> String + Send + Sync,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        let Some(cache) = ctx.policy().cache.as_ref() else {
            return self.inner.run(ctx, doc).await;
        };

        let key = (self.key_fn)(doc);
        if let Some(hit) = cache.get(&key).await {
            debug!(step = %self.inner.name(), key = %key, "cache hit");
            return Ok(Outcome::Progress(hit));
        }

        let outcome = self.inner.run(ctx, doc).await?;
        if let Outcome::Progress(value) | Outcome::Done(value) = &outcome {
            cache.set(&key, value.clone()).await;
            debug!(step = %self.inner.name(), key = %key, "cached step result");
        }
        Ok(outcome)
    }
}
