//! Execution contexts shared by every step of a pipeline.
//!
//! A context is built once per pipeline and handed to each step by
//! reference. It is immutable by convention: anything steps legitimately
//! share and mutate (a cache, an event sink) is an injected service behind an
//! `Arc`, so two pipelines can be given isolated or deliberately shared
//! instances.
//!
//! Steps that need no policy can run against `()`. Steps wrapped in the
//! policy-reading combinators need a context implementing [`PolicyContext`];
//! the generic [`Context`] does, and carries any domain collaborators in its
//! `services` field.

mod backoff;
mod policy;

pub use backoff::{BackoffStrategy, JitterStrategy, RetryBackoff};
pub use policy::{Policy, PolicyConfig, StopCondition};

use crate::events::{EventSink, NoOpEventSink};
use std::fmt;
use std::sync::Arc;

/// Behavior every context offers the engine.
pub trait StepContext: Send + Sync {
    /// Returns the sink the engine reports lifecycle events to.
    fn event_sink(&self) -> &dyn EventSink {
        &NoOpEventSink
    }
}

/// A context exposing a retry/timeout/cache policy to the combinators.
pub trait PolicyContext<T>: StepContext {
    /// Returns the policy.
    fn policy(&self) -> &Policy<T>;
}

impl StepContext for () {}

/// The standard context: a policy, an event sink, and domain services.
pub struct Context<T, S = ()> {
    /// Retry, timeout, cache and stop-condition settings.
    pub policy: Policy<T>,
    /// Domain collaborators (API clients, embedding functions, callbacks).
    pub services: S,
    event_sink: Arc<dyn EventSink>,
}

impl<T> Context<T, ()> {
    /// Creates a context with no services.
    #[must_use]
    pub fn new() -> Self {
        Self::with_services(())
    }
}

impl<T> Default for Context<T, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> Context<T, S> {
    /// Creates a context around domain services.
    #[must_use]
    pub fn with_services(services: S) -> Self {
        Self {
            policy: Policy::default(),
            services,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Policy<T>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the domain services.
    #[must_use]
    pub const fn services(&self) -> &S {
        &self.services
    }
}

impl<T, S: fmt::Debug> fmt::Debug for Context<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("policy", &self.policy)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl<T, S> StepContext for Context<T, S>
where
    S: Send + Sync,
{
    fn event_sink(&self) -> &dyn EventSink {
        self.event_sink.as_ref()
    }
}

impl<T, S> PolicyContext<T> for Context<T, S>
where
    S: Send + Sync,
{
    fn policy(&self) -> &Policy<T> {
        &self.policy
    }
}
