//! Core domain model types for docflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - The `Outcome` a step returns and the `Pause` it may carry
//! - Resume tokens
//! - Stream events

mod event;
mod outcome;

pub use event::{ResumeState, StreamEvent};
pub use outcome::{is_outcome, Outcome, Pause, PauseReason, StepResult};
