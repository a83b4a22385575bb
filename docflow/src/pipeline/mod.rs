//! Pipeline construction and execution.
//!
//! This module provides:
//! - The resumable sequential engine ([`Pipeline`])
//! - Failure handling modes
//! - Run results for callers that want pause-aware completion

mod engine;
#[cfg(test)]
mod integration_tests;

pub use engine::{FailureMode, Pipeline, RunOutcome};
