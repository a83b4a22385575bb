//! Step combinators.
//!
//! Every combinator takes a step (or several) and returns another step over
//! the same context and document type, so they nest freely:
//!
//! ```rust,ignore
//! let step = with_timeout(with_retry(with_cache(fetch, |doc: &Doc| doc.url.clone())));
//! ```
//!
//! The policy-reading combinators (`with_retry`, `with_timeout`,
//! `with_cache`, and `with_alternatives` without an explicit predicate) need a
//! context implementing [`crate::context::PolicyContext`].

mod alternatives;
mod cache;
mod error_handling;
mod retry;
mod sequence;
mod tap;
mod timeout;

pub use alternatives::{with_alternatives, Alternatives};
pub use cache::{with_cache, WithCache};
pub use error_handling::{with_error_handling, WithErrorHandling};
pub use retry::{with_retry, WithRetry};
pub use sequence::{pipe_steps, with_sequence, Sequence};
pub use tap::{tap, Tap};
pub use timeout::{with_timeout, WithTimeout};

/// Method-call forms of the wrapping combinators.
pub trait StepExt: Sized {
    /// See [`with_error_handling`].
    fn with_error_handling(self) -> WithErrorHandling<Self> {
        WithErrorHandling::new(self)
    }

    /// See [`with_retry`].
    fn with_retry(self) -> WithRetry<Self> {
        WithRetry::new(self)
    }

    /// See [`with_timeout`].
    fn with_timeout(self) -> WithTimeout<Self> {
        WithTimeout::new(self)
    }

    /// See [`with_cache`].
    fn with_cache<K>(self, key_fn: K) -> WithCache<Self, K> {
        WithCache::new(self, key_fn)
    }
}

impl<S> StepExt for S {}
