//! Sequential, resumable step execution.

use crate::combinators::Sequence;
use crate::context::{StepContext, StopCondition};
use crate::core::{Outcome, Pause, PauseReason, ResumeState, StreamEvent};
use crate::errors::{PipelineError, ResumeError};
use crate::steps::{invoke, SharedStep, Step};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How the engine treats a step that returns an error or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Log the failure and continue with the unchanged document (default).
    #[default]
    Skip,
    /// Turn the failure into a pause with reason `error`.
    Pause,
}

/// Result of driving a pipeline until it finishes or blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome<T> {
    /// Every step ran.
    Completed(T),
    /// A step paused.
    Paused {
        /// Index of the pausing step.
        step: usize,
        /// The document as it was before the pausing step.
        doc: T,
        /// Why the step paused.
        pause: Pause,
        /// Token that re-runs the pausing step.
        resume: ResumeState<T>,
    },
}

impl<T> RunOutcome<T> {
    /// Returns the latest document, paused or not.
    #[must_use]
    pub fn into_document(self) -> T {
        match self {
            Self::Completed(doc) | Self::Paused { doc, .. } => doc,
        }
    }

    /// Returns true if every step ran.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the finished document, or [`PipelineError::Blocked`].
    pub fn into_result(self) -> Result<T, PipelineError> {
        match self {
            Self::Completed(doc) => Ok(doc),
            Self::Paused { step, pause, .. } => Err(PipelineError::Blocked {
                step,
                reason: pause.reason.to_string(),
                message: pause.message,
            }),
        }
    }
}

/// An ordered list of steps sharing one context.
///
/// The document type is fixed for a pipeline because a resume token carries
/// one serializable document; documents that evolve through phases are
/// modelled as structs whose later fields start out empty.
pub struct Pipeline<C, T> {
    name: String,
    ctx: Arc<C>,
    steps: Vec<SharedStep<C, T>>,
    failure_mode: FailureMode,
}

impl<C, T> fmt::Debug for Pipeline<C, T>
where
    C: Send + Sync,
    T: Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}

/// Per-run bookkeeping for lifecycle events.
struct RunMeta {
    run_id: Uuid,
    fingerprint: String,
}

impl<C, T> Pipeline<C, T>
where
    C: StepContext + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty pipeline that owns its context.
    #[must_use]
    pub fn new(name: impl Into<String>, ctx: C) -> Self {
        Self::with_shared_context(name, Arc::new(ctx))
    }

    /// Creates an empty pipeline over a context shared with other pipelines.
    #[must_use]
    pub fn with_shared_context(name: impl Into<String>, ctx: Arc<C>) -> Self {
        Self {
            name: name.into(),
            ctx,
            steps: Vec::new(),
            failure_mode: FailureMode::default(),
        }
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Appends a step.
    #[must_use]
    pub fn add_step<S>(self, step: S) -> Self
    where
        S: Step<C, T> + 'static,
    {
        self.add_shared_step(Arc::new(step))
    }

    /// Appends a step that is shared with other pipelines.
    #[must_use]
    pub fn add_shared_step(mut self, step: SharedStep<C, T>) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends one slot that tries `steps` in order against a shared document.
    ///
    /// The slot stops at the first pause (returning it) and stops early once
    /// `stop` holds after a sub-step succeeds.
    #[must_use]
    pub fn add_multi_strategy_step(
        self,
        name: impl Into<String>,
        steps: Vec<SharedStep<C, T>>,
        stop: Option<StopCondition<T>>,
    ) -> Self {
        let mut composite = Sequence::new(name, steps);
        if let Some(stop) = stop {
            composite = composite.with_stop_condition(stop);
        }
        self.add_step(composite)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Returns the shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<C> {
        &self.ctx
    }

    /// Identifies the ordered step list.
    ///
    /// Resume tokens carry it so a token issued by a different step list is
    /// rejected instead of re-entering the wrong step.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.steps.len().to_le_bytes());
        for step in &self.steps {
            hasher.update([0u8]);
            hasher.update(step.name().as_bytes());
        }
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }

    /// Checks that a token can be applied to this pipeline.
    pub fn validate_resume(&self, resume: &ResumeState<T>) -> Result<(), ResumeError> {
        if resume.next_step > self.steps.len() {
            return Err(ResumeError::StepOutOfRange {
                next_step: resume.next_step,
                step_count: self.steps.len(),
            });
        }
        if let Some(actual) = &resume.fingerprint {
            let expected = self.fingerprint();
            if *actual != expected {
                return Err(ResumeError::FingerprintMismatch {
                    expected,
                    actual: actual.clone(),
                });
            }
        }
        Ok(())
    }

    /// Streams one event per step, starting at `resume` if given.
    ///
    /// The stream yields `Progress` after each step, then `Done`. It ends
    /// right after the first `Pause`. Dropping the stream stops the run;
    /// a step that is mid-flight is dropped with it.
    pub fn stream(
        &self,
        doc: T,
        resume: Option<ResumeState<T>>,
    ) -> Result<impl Stream<Item = StreamEvent<T>> + Send + '_, ResumeError> {
        let (start, doc) = self.resolve_start(doc, resume)?;
        let meta = self.start_run(start, false);

        Ok(async_stream::stream! {
            let mut index = start;
            let mut pending = Some(doc);
            while let Some(doc) = pending.take() {
                let event = self.advance(index, doc, &meta).await;
                if let StreamEvent::Progress { resume, .. } = &event {
                    index = resume.next_step;
                    pending = Some(resume.doc.clone());
                }
                yield event;
            }
        })
    }

    /// Runs exactly one step (or reports `Done`) and returns its event.
    pub async fn next(
        &self,
        doc: T,
        resume: Option<ResumeState<T>>,
    ) -> Result<StreamEvent<T>, ResumeError> {
        let (start, doc) = self.resolve_start(doc, resume)?;
        let meta = self.start_run(start, true);
        Ok(self.advance(start, doc, &meta).await)
    }

    /// Runs every step and returns the latest document.
    ///
    /// Gives up at the first pause and returns the document as it was before
    /// the pausing step, without saying so. Use [`Self::run_until_blocked`],
    /// [`Self::stream`] or [`Self::next`] to tell "finished" from "blocked".
    pub async fn run(&self, doc: T) -> T {
        let mut last = doc.clone();
        match self.stream(doc, None) {
            Ok(stream) => {
                let mut stream = std::pin::pin!(stream);
                while let Some(event) = stream.next().await {
                    match event {
                        StreamEvent::Progress { doc, .. } => last = doc,
                        StreamEvent::Pause { .. } | StreamEvent::Done { .. } => break,
                    }
                }
            }
            Err(err) => warn!(pipeline = %self.name, error = %err, "could not start run"),
        }
        last
    }

    /// Runs until every step finished or one paused.
    pub async fn run_until_blocked(
        &self,
        doc: T,
        resume: Option<ResumeState<T>>,
    ) -> Result<RunOutcome<T>, ResumeError> {
        let (mut index, mut doc) = self.resolve_start(doc, resume)?;
        let meta = self.start_run(index, false);
        loop {
            match self.advance(index, doc, &meta).await {
                StreamEvent::Progress { resume, .. } => {
                    index = resume.next_step;
                    doc = resume.doc;
                }
                StreamEvent::Pause {
                    index,
                    doc,
                    pause,
                    resume,
                } => {
                    return Ok(RunOutcome::Paused {
                        step: index,
                        doc,
                        pause,
                        resume,
                    });
                }
                StreamEvent::Done { doc } => return Ok(RunOutcome::Completed(doc)),
            }
        }
    }

    fn resolve_start(
        &self,
        doc: T,
        resume: Option<ResumeState<T>>,
    ) -> Result<(usize, T), ResumeError> {
        match resume {
            Some(resume) => {
                self.validate_resume(&resume)?;
                Ok((resume.next_step, resume.doc))
            }
            None => Ok((0, doc)),
        }
    }

    fn start_run(&self, start: usize, single_step: bool) -> RunMeta {
        let meta = RunMeta {
            run_id: Uuid::new_v4(),
            fingerprint: self.fingerprint(),
        };
        debug!(pipeline = %self.name, run_id = %meta.run_id, start, "pipeline run started");
        self.ctx.event_sink().try_emit(
            "pipeline.started",
            Some(serde_json::json!({
                "pipeline": self.name,
                "run_id": meta.run_id.to_string(),
                "start": start,
                "single_step": single_step,
                "timestamp": Utc::now().to_rfc3339(),
            })),
        );
        meta
    }

    fn emit(&self, event_type: &str, meta: &RunMeta, index: usize, extra: Option<serde_json::Value>) {
        let mut data = serde_json::json!({
            "pipeline": self.name,
            "run_id": meta.run_id.to_string(),
            "index": index,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(step) = self.steps.get(index) {
            data["step"] = serde_json::Value::String(step.name().to_string());
        }
        if let Some(serde_json::Value::Object(extra)) = extra {
            for (key, value) in extra {
                data[key.as_str()] = value;
            }
        }
        self.ctx.event_sink().try_emit(event_type, Some(data));
    }

    async fn advance(&self, index: usize, doc: T, meta: &RunMeta) -> StreamEvent<T> {
        let Some(step) = self.steps.get(index) else {
            info!(pipeline = %self.name, run_id = %meta.run_id, "pipeline completed");
            self.emit("pipeline.completed", meta, index, None);
            return StreamEvent::Done { doc };
        };

        let outcome = match invoke(step.as_ref(), self.ctx.as_ref(), &doc).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.emit(
                    "step.failed",
                    meta,
                    index,
                    Some(serde_json::json!({ "error": err.to_string() })),
                );
                match self.failure_mode {
                    FailureMode::Skip => {
                        warn!(
                            pipeline = %self.name,
                            step = %step.name(),
                            index,
                            error = %err,
                            "step failed; continuing with the previous document"
                        );
                        Outcome::Progress(doc.clone())
                    }
                    FailureMode::Pause => {
                        warn!(
                            pipeline = %self.name,
                            step = %step.name(),
                            index,
                            error = %err,
                            "step failed; pausing"
                        );
                        Outcome::Pause(Pause::new(PauseReason::Error).with_message(err.to_string()))
                    }
                }
            }
        };

        match outcome {
            Outcome::Pause(pause) => {
                info!(
                    pipeline = %self.name,
                    step = %step.name(),
                    index,
                    reason = %pause.reason,
                    "step paused"
                );
                self.emit(
                    "step.paused",
                    meta,
                    index,
                    Some(serde_json::json!({ "reason": pause.reason.as_str() })),
                );
                StreamEvent::Pause {
                    index,
                    doc: doc.clone(),
                    pause,
                    resume: ResumeState::new(index, doc).with_fingerprint(meta.fingerprint.clone()),
                }
            }
            Outcome::Progress(next) | Outcome::Done(next) => {
                debug!(pipeline = %self.name, step = %step.name(), index, "step completed");
                self.emit("step.completed", meta, index, None);
                StreamEvent::Progress {
                    index,
                    doc: next.clone(),
                    resume: ResumeState::new(index + 1, next)
                        .with_fingerprint(meta.fingerprint.clone()),
                }
            }
        }
    }
}
