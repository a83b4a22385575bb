//! Re-runs a step after `error` pauses.

use super::error_handling::{doc_payload, WithErrorHandling};
use crate::context::PolicyContext;
use crate::core::{Outcome, Pause, PauseReason, StepResult};
use crate::steps::Step;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

/// Retries a step up to `policy.retries` extra times after `error` pauses.
///
/// The step is wrapped in [`WithErrorHandling`] first, so raised errors count
/// as `error` pauses. Any other pause, and every success, is returned as is.
/// When the retries run out the result is a `retryExceeded` pause whose
/// payload is the original document.
#[derive(Debug, Clone)]
pub struct WithRetry<S> {
    inner: WithErrorHandling<S>,
}

impl<S> WithRetry<S> {
    /// Wraps `inner`.
    pub const fn new(inner: S) -> Self {
        Self {
            inner: WithErrorHandling::new(inner),
        }
    }
}

/// Retries `step` per the context policy.
pub const fn with_retry<S>(step: S) -> WithRetry<S> {
    WithRetry::new(step)
}

#[async_trait]
impl<C, T, S> Step<C, T> for WithRetry<S>
where
    C: PolicyContext<T>,
    T: Serialize + Send + Sync,
    S: Step<C, T>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        let policy = ctx.policy();
        let retries = policy.retries;
        let backoff = policy.backoff;
        let mut attempt: u32 = 0;

        loop {
            let pause = match self.inner.run(ctx, doc).await? {
                Outcome::Pause(pause) if pause.is_error() => pause,
                other => return Ok(other),
            };

            if attempt >= retries {
                warn!(
                    step = %self.name(),
                    attempts = attempt + 1,
                    "retries exhausted"
                );
                let mut exceeded =
                    Pause::new(PauseReason::RetryExceeded).with_payload(doc_payload(doc));
                exceeded.message = pause.message;
                return Ok(Outcome::Pause(exceeded));
            }

            let delay = backoff.delay_for(attempt);
            attempt += 1;
            debug!(
                step = %self.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = pause.message.as_deref().unwrap_or_default(),
                "retrying step"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
