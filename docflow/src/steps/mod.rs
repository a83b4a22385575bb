//! The step trait and closure adapters.
//!
//! A step is a function from (context, document) to a new document or a
//! pause/completion [`Outcome`]. Steps borrow the document and return a
//! replacement; they never mutate it in place.

use crate::core::{Outcome, StepResult};
use crate::errors::StepError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::{self, Debug};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Trait for pipeline steps.
#[async_trait]
pub trait Step<C, T>: Send + Sync
where
    C: Send + Sync,
    T: Send + Sync,
{
    /// Returns the name of the step, used in logs, events and fingerprints.
    fn name(&self) -> &str;

    /// Runs the step against the current document.
    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T>;
}

/// A step shared between pipelines and combinators.
pub type SharedStep<C, T> = Arc<dyn Step<C, T>>;

#[async_trait]
impl<C, T, S> Step<C, T> for Arc<S>
where
    C: Send + Sync,
    T: Send + Sync,
    S: Step<C, T> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        (**self).run(ctx, doc).await
    }
}

/// Runs a step, converting a panic into [`StepError::Panicked`].
pub(crate) async fn invoke<C, T, S>(step: &S, ctx: &C, doc: &T) -> StepResult<T>
where
    C: Send + Sync,
    T: Send + Sync,
    S: Step<C, T> + ?Sized,
{
    match AssertUnwindSafe(step.run(ctx, doc)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(StepError::from_panic(panic.as_ref())),
    }
}

/// A step backed by a synchronous closure.
pub struct FnStep<F> {
    name: String,
    func: F,
}

impl<F> FnStep<F> {
    /// Creates a new function-based step.
    pub fn new<C, T>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&C, &T) -> StepResult<T> + Send + Sync,
    {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<C, T, F> Step<C, T> for FnStep<F>
where
    C: Send + Sync,
    T: Send + Sync,
    F: Fn(&C, &T) -> StepResult<T> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        (self.func)(ctx, doc)
    }
}

/// A step backed by a closure returning a boxed future.
///
/// ```rust,ignore
/// let step = AsyncFnStep::new("fetch", |ctx: &Ctx, doc: &Doc| {
///     Box::pin(async move { Ok(Outcome::Progress(ctx.fetch(doc).await?)) })
/// });
/// ```
pub struct AsyncFnStep<F> {
    name: String,
    func: F,
}

impl<F> AsyncFnStep<F> {
    /// Creates a new async function-based step.
    pub fn new<C, T>(name: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a C, &'a T) -> BoxFuture<'a, StepResult<T>> + Send + Sync,
    {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for AsyncFnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnStep")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<C, T, F> Step<C, T> for AsyncFnStep<F>
where
    C: Send + Sync,
    T: Send + Sync,
    F: for<'a> Fn(&'a C, &'a T) -> BoxFuture<'a, StepResult<T>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &C, doc: &T) -> StepResult<T> {
        (self.func)(ctx, doc).await
    }
}

/// A step that returns the document unchanged.
#[derive(Debug, Clone)]
pub struct IdentityStep {
    name: String,
}

impl IdentityStep {
    /// Creates a new identity step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<C, T> Step<C, T> for IdentityStep
where
    C: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &C, doc: &T) -> StepResult<T> {
        Ok(Outcome::Progress(doc.clone()))
    }
}
