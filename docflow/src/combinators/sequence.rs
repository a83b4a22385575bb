//! Threads a document through several steps inside one pipeline slot.

use crate::context::StopCondition;
use crate::core::{Outcome, StepResult};
use crate::steps::{SharedStep, Step};
use async_trait::async_trait;
use std::fmt;
use tracing::debug;

/// Runs sub-steps in order against a shared document.
///
/// A pause from any sub-step is returned at once and later sub-steps do not
/// run. `Done` results are unwrapped and fed forward. With a stop condition,
/// the sequence ends early as soon as it holds after a sub-step succeeds.
/// Errors propagate to the caller.
pub struct Sequence<C, T> {
    name: String,
    steps: Vec<SharedStep<C, T>>,
    stop: Option<StopCondition<T>>,
}

impl<C, T> Sequence<C, T> {
    /// Creates a sequence with no stop condition.
    pub fn new(name: impl Into<String>, steps: Vec<SharedStep<C, T>>) -> Self {
        Self {
            name: name.into(),
            steps,
            stop: None,
        }
    }

    /// Ends the sequence early once `stop` holds.
    #[must_use]
    pub fn with_stop_condition(mut self, stop: StopCondition<T>) -> Self {
        self.stop = Some(stop);
        self
    }
}

impl<C, T> fmt::Debug for Sequence<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("stop", &self.stop.is_some())
            .finish()
    }
}

/// Chains `steps`, stopping early once `stop` holds.
pub fn with_sequence<C, T>(
    name: impl Into<String>,
    steps: Vec<SharedStep<C, T>>,
    stop: Option<StopCondition<T>>,
) -> Sequence<C, T> {
    let sequence = Sequence::new(name, steps);
    match stop {
        Some(stop) => sequence.with_stop_condition(stop),
        None => sequence,
    }
}

/// Chains `steps` with no early stop.
pub fn pipe_steps<C, T>(name: impl Into<String>, steps: Vec<SharedStep<C, T>>) -> Sequence<C, T> {
    Sequence::new(name, steps)
}

#[async_trait]
impl<C, T> Step<C, T> for Sequence<C, T>
where
    C: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        let mut current = doc.clone();
        for step in &self.steps {
            match step.run(ctx, &current).await? {
                Outcome::Pause(pause) => return Ok(Outcome::Pause(pause)),
                Outcome::Progress(next) | Outcome::Done(next) => current = next,
            }
            if self.stop.as_ref().is_some_and(|stop| stop(&current)) {
                debug!(sequence = %self.name, step = %step.name(), "stop condition met");
                break;
            }
        }
        Ok(Outcome::Progress(current))
    }
}
