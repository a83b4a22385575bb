//! Strategy chains: try refinements until one is good enough.

use crate::context::{PolicyContext, StopCondition};
use crate::core::{Outcome, StepResult};
use crate::errors::StepError;
use crate::steps::{invoke, SharedStep, Step};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

/// Runs strategies in order, feeding each one's output to the next.
///
/// The first output the accept predicate approves is returned. The predicate
/// is the explicit one if given, otherwise `policy.stop_condition`. A pause
/// is returned at once. A strategy that errors is logged and skipped; the
/// chain carries on with the last good output. If nothing is accepted the
/// last good output is returned, and if no strategy produced output at all
/// the last error is.
pub struct Alternatives<C, T> {
    name: String,
    steps: Vec<SharedStep<C, T>>,
    accept: Option<StopCondition<T>>,
}

impl<C, T> Alternatives<C, T> {
    /// Creates a chain that falls back to the policy's stop condition.
    pub fn new(name: impl Into<String>, steps: Vec<SharedStep<C, T>>) -> Self {
        Self {
            name: name.into(),
            steps,
            accept: None,
        }
    }

    /// Sets an explicit accept predicate.
    #[must_use]
    pub fn with_accept(mut self, accept: StopCondition<T>) -> Self {
        self.accept = Some(accept);
        self
    }
}

impl<C, T> fmt::Debug for Alternatives<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alternatives")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("accept", &self.accept.is_some())
            .finish()
    }
}

/// Chains `steps` as alternatives, accepting per `accept` or the policy.
pub fn with_alternatives<C, T>(
    name: impl Into<String>,
    steps: Vec<SharedStep<C, T>>,
    accept: Option<StopCondition<T>>,
) -> Alternatives<C, T> {
    let chain = Alternatives::new(name, steps);
    match accept {
        Some(accept) => chain.with_accept(accept),
        None => chain,
    }
}

#[async_trait]
impl<C, T> Step<C, T> for Alternatives<C, T>
where
    C: PolicyContext<T>,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        let accept = self
            .accept
            .clone()
            .or_else(|| ctx.policy().stop_condition.clone());

        let mut current = doc.clone();
        let mut produced = false;
        let mut last_error: Option<StepError> = None;

        for step in &self.steps {
            match invoke(step.as_ref(), ctx, &current).await {
                Ok(Outcome::Pause(pause)) => return Ok(Outcome::Pause(pause)),
                Ok(Outcome::Progress(next) | Outcome::Done(next)) => {
                    current = next;
                    produced = true;
                    if accept.as_ref().is_some_and(|accept| accept(&current)) {
                        debug!(chain = %self.name, strategy = %step.name(), "strategy accepted");
                        return Ok(Outcome::Progress(current));
                    }
                }
                Err(err) => {
                    warn!(
                        chain = %self.name,
                        strategy = %step.name(),
                        error = %err,
                        "strategy failed; trying the next one"
                    );
                    last_error = Some(err);
                }
            }
        }

        match (produced, last_error) {
            (false, Some(err)) => Err(err),
            _ => Ok(Outcome::Progress(current)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, Policy};
    use crate::core::PauseReason;
    use crate::steps::FnStep;
    use std::sync::Arc;

    type Ctx = Context<String>;

    fn append(suffix: &'static str) -> SharedStep<Ctx, String> {
        Arc::new(FnStep::new(suffix, move |_: &Ctx, doc: &String| {
            Ok(Outcome::Progress(format!("{doc}{suffix}")))
        }))
    }

    fn failing() -> SharedStep<Ctx, String> {
        Arc::new(FnStep::new("failing", |_: &Ctx, _: &String| {
            Err(StepError::failed("strategy unavailable"))
        }))
    }

    #[tokio::test]
    async fn test_first_accepted_output_wins() {
        let accept: StopCondition<String> = Arc::new(|doc: &String| doc.len() >= 3);
        let chain = with_alternatives("refine", vec![append("a"), append("bc"), append("d")], Some(accept));
        let out = chain.run(&Ctx::new(), &String::new()).await.unwrap();
        assert_eq!(out, Outcome::Progress("abc".to_string()));
    }

    #[tokio::test]
    async fn test_falls_back_to_policy_stop_condition() {
        let ctx: Ctx = Context::new()
            .with_policy(Policy::new().with_stop_condition(|doc: &String| doc.ends_with('a')));
        let chain = with_alternatives("refine", vec![append("a"), append("b")], None);
        let out = chain.run(&ctx, &String::new()).await.unwrap();
        assert_eq!(out, Outcome::Progress("a".to_string()));
    }

    #[tokio::test]
    async fn test_unaccepted_returns_last_output() {
        let chain = with_alternatives("refine", vec![append("a"), append("b")], None);
        let out = chain.run(&Ctx::new(), &String::new()).await.unwrap();
        assert_eq!(out, Outcome::Progress("ab".to_string()));
    }

    #[tokio::test]
    async fn test_failed_strategy_is_skipped() {
        let chain = with_alternatives("refine", vec![append("a"), failing(), append("b")], None);
        let out = chain.run(&Ctx::new(), &String::new()).await.unwrap();
        assert_eq!(out, Outcome::Progress("ab".to_string()));
    }

    #[tokio::test]
    async fn test_all_failed_returns_error() {
        let chain = with_alternatives("refine", vec![failing(), failing()], None);
        let err = chain.run(&Ctx::new(), &String::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "strategy unavailable");
    }

    #[tokio::test]
    async fn test_pause_propagates() {
        let pausing: SharedStep<Ctx, String> = Arc::new(FnStep::new("wait", |_: &Ctx, _: &String| {
            Ok(Outcome::pause(PauseReason::Custom("rate-limited".to_string())))
        }));
        let chain = with_alternatives("refine", vec![pausing, append("b")], None);
        let out = chain.run(&Ctx::new(), &String::new()).await.unwrap();
        assert_eq!(out.as_pause().unwrap().reason.as_str(), "rate-limited");
    }
}
