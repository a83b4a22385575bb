//! Side effects that leave the document alone.

use crate::core::{Outcome, StepResult};
use crate::steps::Step;
use async_trait::async_trait;
use std::fmt;

/// Calls a function with `(context, document)` and passes the document on.
pub struct Tap<F> {
    name: String,
    func: F,
}

impl<F> Tap<F> {
    /// Creates a named tap.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for Tap<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tap").field("name", &self.name).finish()
    }
}

/// Creates a step that runs `func` for its side effect.
pub fn tap<C, T, F>(name: impl Into<String>, func: F) -> Tap<F>
where
    F: Fn(&C, &T) + Send + Sync,
{
    Tap::new(name, func)
}

#[async_trait]
impl<C, T, F> Step<C, T> for Tap<F>
where
    C: Send + Sync,
    T: Clone + Send + Sync,
    F: Fn(&C, &T) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        (self.func)(ctx, doc);
        Ok(Outcome::Progress(doc.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tap_observes_and_passes_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let step = tap("log", move |_: &(), doc: &String| sink.lock().push(doc.clone()));

        let outcome = step.run(&(), &"hello".to_string()).await.unwrap();
        assert_eq!(outcome, Outcome::Progress("hello".to_string()));
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }
}
