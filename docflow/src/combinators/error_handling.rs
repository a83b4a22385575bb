//! Turns step failures into explicit `error` pauses.

use crate::core::{Outcome, Pause, PauseReason, StepResult};
use crate::steps::{invoke, Step};
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

/// Serializes a document for a pause payload, falling back to `null`.
pub(crate) fn doc_payload<T: Serialize>(doc: &T) -> serde_json::Value {
    serde_json::to_value(doc).unwrap_or(serde_json::Value::Null)
}

/// Wraps a step so that errors and panics become `Pause(error)`.
///
/// The pause payload is the document the step was given.
#[derive(Debug, Clone)]
pub struct WithErrorHandling<S> {
    inner: S,
}

impl<S> WithErrorHandling<S> {
    /// Wraps `inner`.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns the wrapped step.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

/// Wraps `step` so that errors and panics become `Pause(error)`.
pub const fn with_error_handling<S>(step: S) -> WithErrorHandling<S> {
    WithErrorHandling::new(step)
}

#[async_trait]
impl<C, T, S> Step<C, T> for WithErrorHandling<S>
where
    C: Send + Sync,
    T: Serialize + Send + Sync,
    S: Step<C, T>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        match invoke(&self.inner, ctx, doc).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(step = %self.inner.name(), error = %err, "step failed");
                Ok(Outcome::Pause(
                    Pause::new(PauseReason::Error)
                        .with_payload(doc_payload(doc))
                        .with_message(err.to_string()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepError;
    use crate::steps::FnStep;

    #[tokio::test]
    async fn test_error_becomes_pause_with_original_document() {
        let step = with_error_handling(FnStep::new("boom", |_: &(), _: &i32| {
            Err(StepError::failed("boom"))
        }));

        let outcome = step.run(&(), &41).await.unwrap();
        let pause = outcome.as_pause().unwrap();
        assert_eq!(pause.reason, PauseReason::Error);
        assert_eq!(pause.payload, Some(serde_json::json!(41)));
        assert_eq!(pause.message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let step = with_error_handling(FnStep::new("ok", |_: &(), doc: &i32| {
            Ok(Outcome::Done(doc + 1))
        }));
        assert_eq!(step.run(&(), &1).await.unwrap(), Outcome::Done(2));
    }
}
