//! One wide summary event per pipeline run.

use crate::events::EventSink;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// How a summarized run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEnd {
    /// Every step ran.
    Completed,
    /// A step paused.
    Paused,
    /// The single step of a `next` call finished.
    Stepped,
    /// The run was still open when the sink was flushed.
    Abandoned,
}

/// Aggregate of one run's lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Pipeline name.
    pub pipeline: String,
    /// Run id.
    pub run_id: String,
    /// Index the run started at.
    pub start: u64,
    /// Steps that completed.
    pub completed: u32,
    /// Steps whose error was swallowed.
    pub failed: u32,
    /// How the run ended.
    pub end: RunEnd,
    /// Index of the pausing step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<u64>,
    /// Pause reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Wall time from start to end.
    pub duration_ms: f64,
}

struct OpenRun {
    pipeline: String,
    start: u64,
    single_step: bool,
    completed: u32,
    failed: u32,
    started_at: Instant,
}

/// Summaries a [`WideEventSink`] keeps by default.
pub const DEFAULT_SUMMARY_CAPACITY: usize = 1024;

fn field<'a>(data: Option<&'a serde_json::Value>, key: &str) -> Option<&'a serde_json::Value> {
    data.and_then(|d| d.get(key))
}

fn str_field(data: Option<&serde_json::Value>, key: &str) -> Option<String> {
    field(data, key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Folds lifecycle events into one `pipeline.summary` event per run.
///
/// The summary is logged at info level and kept for [`Self::summaries`];
/// only the newest `capacity` summaries are retained. Every event is also
/// forwarded to the inner sink, if one is set.
pub struct WideEventSink {
    open: DashMap<String, OpenRun>,
    finished: Mutex<VecDeque<RunSummary>>,
    capacity: usize,
    inner: Option<Arc<dyn EventSink>>,
}

impl Default for WideEventSink {
    fn default() -> Self {
        Self {
            open: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_SUMMARY_CAPACITY,
            inner: None,
        }
    }
}

impl std::fmt::Debug for WideEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WideEventSink")
            .field("open", &self.open.len())
            .field("finished", &self.finished.lock().len())
            .finish_non_exhaustive()
    }
}

impl WideEventSink {
    /// Creates a sink with no inner sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `capacity` summaries, dropping the oldest.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Forwards every event to `inner` as well.
    #[must_use]
    pub fn with_inner(mut self, inner: Arc<dyn EventSink>) -> Self {
        self.inner = Some(inner);
        self
    }

    /// Returns the summaries of finished runs.
    #[must_use]
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.finished.lock().iter().cloned().collect()
    }

    /// Removes and returns the retained summaries.
    pub fn drain_summaries(&self) -> Vec<RunSummary> {
        self.finished.lock().drain(..).collect()
    }

    /// Returns the number of runs still open.
    #[must_use]
    pub fn open_runs(&self) -> usize {
        self.open.len()
    }

    /// Summarizes every open run as abandoned.
    ///
    /// Runs only stay open while a step is in flight or when a stream was
    /// dropped early; flush them when the driver stops.
    pub fn flush(&self) {
        let run_ids: Vec<String> = self.open.iter().map(|e| e.key().clone()).collect();
        for run_id in run_ids {
            self.close(&run_id, RunEnd::Abandoned, None, None);
        }
    }

    fn record(&self, event_type: &str, data: Option<&serde_json::Value>) {
        let Some(run_id) = str_field(data, "run_id") else {
            return;
        };
        match event_type {
            "pipeline.started" => {
                self.open.insert(
                    run_id,
                    OpenRun {
                        pipeline: str_field(data, "pipeline").unwrap_or_default(),
                        start: field(data, "start")
                            .and_then(serde_json::Value::as_u64)
                            .unwrap_or_default(),
                        single_step: field(data, "single_step")
                            .and_then(serde_json::Value::as_bool)
                            .unwrap_or_default(),
                        completed: 0,
                        failed: 0,
                        started_at: Instant::now(),
                    },
                );
            }
            "step.completed" | "step.failed" => {
                let single_step = match self.open.get_mut(&run_id) {
                    Some(mut run) => {
                        if event_type == "step.completed" {
                            run.completed += 1;
                        } else {
                            run.failed += 1;
                        }
                        run.single_step
                    }
                    None => false,
                };
                if single_step {
                    self.close(&run_id, RunEnd::Stepped, None, None);
                }
            }
            "step.paused" => {
                let index = field(data, "index").and_then(serde_json::Value::as_u64);
                self.close(&run_id, RunEnd::Paused, index, str_field(data, "reason"));
            }
            "pipeline.completed" => self.close(&run_id, RunEnd::Completed, None, None),
            _ => {}
        }
    }

    fn close(&self, run_id: &str, end: RunEnd, paused_at: Option<u64>, reason: Option<String>) {
        let Some((run_id, run)) = self.open.remove(run_id) else {
            return;
        };
        let summary = RunSummary {
            pipeline: run.pipeline,
            run_id,
            start: run.start,
            completed: run.completed,
            failed: run.failed,
            end,
            paused_at,
            reason,
            duration_ms: run.started_at.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            pipeline = %summary.pipeline,
            run_id = %summary.run_id,
            completed = summary.completed,
            failed = summary.failed,
            end = ?summary.end,
            reason = summary.reason.as_deref().unwrap_or(""),
            duration_ms = summary.duration_ms,
            "pipeline.summary"
        );
        let mut finished = self.finished.lock();
        finished.push_back(summary);
        while finished.len() > self.capacity {
            finished.pop_front();
        }
    }
}

#[async_trait]
impl EventSink for WideEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.record(event_type, data.as_ref());
        if let Some(inner) = &self.inner {
            inner.emit(event_type, data).await;
        }
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.record(event_type, data.as_ref());
        if let Some(inner) = &self.inner {
            inner.try_emit(event_type, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::core::{Outcome, PauseReason, StepResult};
    use crate::events::CollectingEventSink;
    use crate::pipeline::Pipeline;
    use crate::steps::FnStep;
    use crate::testing::PausingStep;
    use futures::StreamExt;

    fn bump() -> FnStep<impl Fn(&Context<i32>, &i32) -> StepResult<i32> + Send + Sync> {
        FnStep::new("bump", |_: &Context<i32>, doc: &i32| Ok(Outcome::Progress(doc + 1)))
    }

    #[tokio::test]
    async fn test_completed_run_is_summarized() {
        let sink = Arc::new(WideEventSink::new());
        let ctx = Context::<i32>::new().with_event_sink(sink.clone());
        let pipeline = Pipeline::new("wide", ctx).add_step(bump()).add_step(bump());

        assert_eq!(pipeline.run(0).await, 2);
        let summaries = sink.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].pipeline, "wide");
        assert_eq!(summaries[0].completed, 2);
        assert_eq!(summaries[0].end, RunEnd::Completed);
        assert_eq!(sink.open_runs(), 0);
    }

    #[tokio::test]
    async fn test_paused_run_records_reason_and_forwards() {
        let inner = Arc::new(CollectingEventSink::new());
        let sink = Arc::new(WideEventSink::new().with_inner(inner.clone()));
        let ctx = Context::<i32>::new().with_event_sink(sink.clone());
        let pipeline = Pipeline::new("wide", ctx)
            .add_step(bump())
            .add_step(PausingStep::new("wait", PauseReason::from("awaiting-input"), 1));

        pipeline.run(0).await;
        let summary = &sink.summaries()[0];
        assert_eq!(summary.end, RunEnd::Paused);
        assert_eq!(summary.paused_at, Some(1));
        assert_eq!(summary.reason.as_deref(), Some("awaiting-input"));
        assert_eq!(summary.completed, 1);
        assert!(!inner.is_empty());
    }

    #[tokio::test]
    async fn test_next_calls_close_their_run() {
        let sink = Arc::new(WideEventSink::new());
        let ctx = Context::<i32>::new().with_event_sink(sink.clone());
        let pipeline = Pipeline::new("wide", ctx).add_step(bump()).add_step(bump());

        let mut resume = None;
        for _ in 0..2 {
            let event = pipeline.next(0, resume).await.unwrap();
            resume = event.resume().cloned();
        }
        assert_eq!(sink.open_runs(), 0);
        let ends: Vec<RunEnd> = sink.summaries().iter().map(|s| s.end).collect();
        assert_eq!(ends, vec![RunEnd::Stepped, RunEnd::Stepped]);
    }

    #[tokio::test]
    async fn test_retained_summaries_are_bounded() {
        let sink = Arc::new(WideEventSink::new().with_capacity(3));
        let ctx = Context::<i32>::new().with_event_sink(sink.clone());
        let pipeline = Pipeline::new("wide", ctx).add_step(bump());

        for _ in 0..10 {
            pipeline.run(0).await;
            pipeline.next(0, None).await.unwrap();
        }
        assert_eq!(sink.open_runs(), 0);
        assert_eq!(sink.summaries().len(), 3);
        assert_eq!(sink.drain_summaries().len(), 3);
        assert!(sink.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_flush_closes_dropped_streams() {
        let sink = Arc::new(WideEventSink::new());
        let ctx = Context::<i32>::new().with_event_sink(sink.clone());
        let pipeline = Pipeline::new("wide", ctx).add_step(bump()).add_step(bump());

        {
            let stream = pipeline.stream(0, None).unwrap();
            let mut stream = std::pin::pin!(stream);
            stream.next().await.unwrap();
        }
        assert_eq!(sink.open_runs(), 1);
        sink.flush();
        assert_eq!(sink.open_runs(), 0);
        assert_eq!(sink.summaries()[0].end, RunEnd::Abandoned);
    }
}
