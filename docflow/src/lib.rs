//! # Docflow
//!
//! Resumable step pipelines over an evolving document.
//!
//! A pipeline is an ordered list of steps. Each step reads the current
//! document and returns a replacement, an early final value, or a pause.
//! Every event a run yields carries a serializable resume token, so a paused
//! run can be persisted and continued later, in another process if need be.
//!
//! - **Engine**: `run`, `stream`, `next` and `run_until_blocked`
//! - **Combinators**: retry, timeout, cache, error handling, taps, sequences
//!   and alternatives
//! - **Domain step sets**: semantic chunking, a batch job lifecycle and
//!   single-shot JSON generation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docflow::prelude::*;
//!
//! let pipeline = Pipeline::new("enrich", Context::new())
//!     .add_step(Fetch)
//!     .add_step(with_timeout(with_retry(Summarize)))
//!     .add_step(Store);
//!
//! match pipeline.run_until_blocked(doc, None).await? {
//!     RunOutcome::Completed(doc) => save(doc),
//!     RunOutcome::Paused { resume, .. } => persist(resume),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod batch;
pub mod cache;
pub mod chunking;
pub mod combinators;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod generate;
pub mod observability;
pub mod pipeline;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{cache_key, InMemoryCache, StepCache};
    pub use crate::combinators::{
        pipe_steps, tap, with_alternatives, with_cache, with_error_handling, with_retry,
        with_sequence, with_timeout, StepExt,
    };
    pub use crate::context::{Context, Policy, PolicyContext, RetryBackoff, StepContext};
    pub use crate::core::{
        is_outcome, Outcome, Pause, PauseReason, ResumeState, StepResult, StreamEvent,
    };
    pub use crate::errors::{PipelineError, ResumeError, StepError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{FailureMode, Pipeline, RunOutcome};
    pub use crate::steps::{AsyncFnStep, FnStep, IdentityStep, SharedStep, Step};
}
