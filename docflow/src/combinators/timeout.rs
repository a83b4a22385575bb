//! Bounds a step's running time.

use super::error_handling::doc_payload;
use crate::context::PolicyContext;
use crate::core::{Outcome, Pause, PauseReason, StepResult};
use crate::steps::Step;
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

/// Races a step against `policy.timeout_ms`.
///
/// On expiry the step's future is dropped, cancelling it at its next await
/// point, and the result is a `timeout` pause carrying the original document.
/// Tasks the step spawned itself keep running. A timeout of zero or less
/// runs the step unguarded.
#[derive(Debug, Clone)]
pub struct WithTimeout<S> {
    inner: S,
}

impl<S> WithTimeout<S> {
    /// Wraps `inner`.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

/// Bounds `step` by the context's timeout.
pub const fn with_timeout<S>(step: S) -> WithTimeout<S> {
    WithTimeout::new(step)
}

#[async_trait]
impl<C, T, S> Step<C, T> for WithTimeout<S>
where
    C: PolicyContext<T>,
    T: Serialize + Send + Sync,
    S: Step<C, T>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        let Some(limit) = ctx.policy().timeout() else {
            return self.inner.run(ctx, doc).await;
        };

        match tokio::time::timeout(limit, self.inner.run(ctx, doc)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    step = %self.inner.name(),
                    timeout_ms = limit.as_millis() as u64,
                    "step timed out"
                );
                Ok(Outcome::Pause(
                    Pause::new(PauseReason::Timeout)
                        .with_payload(doc_payload(doc))
                        .with_message(format!("timed out after {}ms", limit.as_millis())),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, Policy};
    use crate::steps::AsyncFnStep;
    use std::time::Duration;

    fn sleeper(ms: u64) -> impl Step<Context<i32>, i32> {
        AsyncFnStep::new("sleeper", move |_: &Context<i32>, doc: &i32| {
            let next = doc + 1;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Outcome::Progress(next))
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_step_pauses_with_timeout() {
        let ctx: Context<i32> = Context::new().with_policy(Policy::new().with_timeout_ms(50));
        let outcome = with_timeout(sleeper(1_000)).run(&ctx, &7).await.unwrap();

        let pause = outcome.as_pause().unwrap();
        assert_eq!(pause.reason, PauseReason::Timeout);
        assert_eq!(pause.payload, Some(serde_json::json!(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_step_completes() {
        let ctx: Context<i32> = Context::new().with_policy(Policy::new().with_timeout_ms(500));
        let outcome = with_timeout(sleeper(10)).run(&ctx, &7).await.unwrap();
        assert_eq!(outcome, Outcome::Progress(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_timeout_is_disabled() {
        for timeout_ms in [0, -1] {
            let ctx: Context<i32> =
                Context::new().with_policy(Policy::new().with_timeout_ms(timeout_ms));
            let outcome = with_timeout(sleeper(60_000)).run(&ctx, &1).await.unwrap();
            assert_eq!(outcome, Outcome::Progress(2));
        }
    }
}
