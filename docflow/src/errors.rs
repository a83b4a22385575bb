//! Error types for the docflow engine.
//!
//! Steps report failure through [`StepError`], which is what the engine and
//! the error-handling combinators catch. Everything that goes wrong around a
//! pipeline (stale resume tokens, blocked runs) is a [`PipelineError`].

use thiserror::Error;

/// An error raised by a step.
///
/// This is the Rust rendition of a step "throwing": the engine treats it as a
/// no-op by default, and `with_error_handling` turns it into a pause.
#[derive(Debug, Error)]
pub enum StepError {
    /// The step failed with a message.
    #[error("{0}")]
    Failed(String),

    /// File or stream IO failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON value could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remote call failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The step panicked while running.
    #[error("Step panicked: {0}")]
    Panicked(String),

    /// Any other collaborator error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Creates a failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates an HTTP failure with a message.
    #[must_use]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http(message.into())
    }

    /// Builds a `Panicked` error from a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for StepError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Error raised when a resume token cannot be applied to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResumeError {
    /// The token points past the end of the step list.
    #[error("Resume step {next_step} is out of range for a pipeline of {step_count} steps")]
    StepOutOfRange {
        /// The index carried by the token.
        next_step: usize,
        /// The number of steps in the pipeline.
        step_count: usize,
    },

    /// The token was produced by a different step list.
    #[error("Resume token fingerprint {actual} does not match pipeline fingerprint {expected}")]
    FingerprintMismatch {
        /// The fingerprint of the current pipeline.
        expected: String,
        /// The fingerprint carried by the token.
        actual: String,
    },
}

/// The main error type for docflow operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A resume token was rejected.
    #[error("{0}")]
    Resume(#[from] ResumeError),

    /// A step error surfaced outside the engine.
    #[error("{0}")]
    Step(#[from] StepError),

    /// The pipeline paused where the caller needed a finished document.
    #[error("Pipeline blocked at step {step} ({reason}){}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Blocked {
        /// Index of the pausing step.
        step: usize,
        /// The pause reason.
        reason: String,
        /// Optional diagnostic message.
        message: Option<String>,
    },

    /// Whole-cycle validation retries were used up.
    #[error("Validation failed after {attempts} attempts: {reason}")]
    ValidationExhausted {
        /// Number of full cycles attempted.
        attempts: u32,
        /// The last rejection reason.
        reason: String,
    },

    /// A document or token could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
