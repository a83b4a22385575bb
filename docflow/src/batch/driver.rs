//! Driving a batch pipeline one tick at a time.

use super::steps::{AWAITING_INPUT, BATCH_PREFIX, PROCESSING_OUTPUTS};
use super::{BatchDoc, BatchPipeline};
use crate::core::{PauseReason, ResumeState, StreamEvent};
use crate::errors::PipelineError;
use std::time::Duration;
use tracing::{debug, warn};

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// A step completed; persist `resume` and tick again.
    Advanced {
        /// Token for the next step.
        resume: ResumeState<BatchDoc>,
    },
    /// A step paused; persist `resume` and tick again later.
    Waiting {
        /// Why the step paused.
        reason: PauseReason,
        /// Detail of an error pause.
        message: Option<String>,
        /// Suggested delay before the next tick.
        retry_after: Option<Duration>,
        /// Token that re-enters the paused step, with the pause payload
        /// already folded into its document.
        resume: ResumeState<BatchDoc>,
    },
    /// Every step has run.
    Finished(BatchDoc),
}

impl Tick {
    /// Returns the token to persist, if any.
    #[must_use]
    pub const fn resume(&self) -> Option<&ResumeState<BatchDoc>> {
        match self {
            Self::Advanced { resume } | Self::Waiting { resume, .. } => Some(resume),
            Self::Finished(_) => None,
        }
    }
}

/// Returns true for pauses that are part of a healthy run.
fn is_lifecycle_wait(reason: &PauseReason) -> bool {
    match reason {
        PauseReason::Custom(reason) => {
            reason == AWAITING_INPUT
                || reason == PROCESSING_OUTPUTS
                || reason.starts_with(BATCH_PREFIX)
        }
        _ => false,
    }
}

/// Runs one step and folds any pause payload into the returned token.
pub async fn tick(
    pipeline: &BatchPipeline,
    doc: BatchDoc,
    resume: Option<ResumeState<BatchDoc>>,
) -> Result<Tick, PipelineError> {
    let event = pipeline.next(doc, resume).await?;
    Ok(match event {
        StreamEvent::Progress { resume, .. } => Tick::Advanced { resume },
        StreamEvent::Pause {
            doc, pause, resume, ..
        } => {
            let folded = doc.absorb_pause(&pause)?;
            let retry_after = pause
                .payload
                .as_ref()
                .and_then(|p| p.get("retryAfterMs"))
                .and_then(serde_json::Value::as_u64)
                .map(Duration::from_millis);
            Tick::Waiting {
                reason: pause.reason,
                message: pause.message,
                retry_after,
                resume: ResumeState {
                    doc: folded,
                    ..resume
                },
            }
        }
        StreamEvent::Done { doc } => Tick::Finished(doc),
    })
}

/// Ticks until the lifecycle finishes, sleeping as pauses suggest.
///
/// Lifecycle waits (`awaiting-input`, `batch:<status>`, `processing-outputs`)
/// are continued; any other pause fails with [`PipelineError::Blocked`]
/// carrying the index of the paused step.
pub async fn run_to_completion(
    pipeline: &BatchPipeline,
    doc: BatchDoc,
    resume: Option<ResumeState<BatchDoc>>,
) -> Result<BatchDoc, PipelineError> {
    let mut doc = doc;
    let mut resume = resume;
    loop {
        match tick(pipeline, doc.clone(), resume.take()).await? {
            Tick::Advanced { resume: next } => {
                doc = next.doc.clone();
                resume = Some(next);
            }
            Tick::Waiting {
                reason,
                message,
                retry_after,
                resume: next,
            } => {
                if !is_lifecycle_wait(&reason) {
                    warn!(step = next.next_step, reason = %reason, "batch run blocked");
                    return Err(PipelineError::Blocked {
                        step: next.next_step,
                        reason: reason.to_string(),
                        message,
                    });
                }
                debug!(step = next.next_step, reason = %reason, ?retry_after, "batch run waiting");
                if let Some(delay) = retry_after.filter(|d| !d.is_zero()) {
                    tokio::time::sleep(delay).await;
                }
                doc = next.doc.clone();
                resume = Some(next);
            }
            Tick::Finished(doc) => return Ok(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_waits() {
        assert!(is_lifecycle_wait(&PauseReason::from("awaiting-input")));
        assert!(is_lifecycle_wait(&PauseReason::from("processing-outputs")));
        assert!(is_lifecycle_wait(&PauseReason::from("batch:in_progress")));
        assert!(!is_lifecycle_wait(&PauseReason::Error));
        assert!(!is_lifecycle_wait(&PauseReason::RetryExceeded));
        assert!(!is_lifecycle_wait(&PauseReason::from("rejected")));
    }
}
