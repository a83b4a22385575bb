//! Step doubles for testing.
//!
//! Every double passes the document through unchanged when it succeeds, and
//! counts how often it ran so tests can check re-entry and retry behavior.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{Outcome, Pause, PauseReason, StepResult};
use crate::errors::StepError;
use crate::steps::Step;

/// A step that counts its invocations.
#[derive(Debug)]
pub struct CountingStep {
    name: String,
    calls: AtomicUsize,
}

impl CountingStep {
    /// Creates a new counting step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the step ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C, T> Step<C, T> for CountingStep
where
    C: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &C, doc: &T) -> StepResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Progress(doc.clone()))
    }
}

/// A step that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStep {
    name: String,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyStep {
    /// Creates a step that fails its first `failures` calls.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a step that never succeeds.
    #[must_use]
    pub fn always(name: impl Into<String>) -> Self {
        Self::new(name, usize::MAX)
    }

    /// Returns the number of times the step ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C, T> Step<C, T> for FlakyStep
where
    C: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &C, doc: &T) -> StepResult<T> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(StepError::failed(format!("{} failed on call {}", self.name, call + 1)));
        }
        Ok(Outcome::Progress(doc.clone()))
    }
}

/// A step that sleeps before passing the document on.
#[derive(Debug)]
pub struct SlowStep {
    name: String,
    delay: Duration,
}

impl SlowStep {
    /// Creates a new slow step.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }

    /// Creates a slow step with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }
}

#[async_trait]
impl<C, T> Step<C, T> for SlowStep
where
    C: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &C, doc: &T) -> StepResult<T> {
        tokio::time::sleep(self.delay).await;
        Ok(Outcome::Progress(doc.clone()))
    }
}

/// A step that pauses a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct PausingStep {
    name: String,
    pause: Pause,
    pauses: usize,
    calls: AtomicUsize,
}

impl PausingStep {
    /// Creates a step that pauses its first `pauses` calls with `reason`.
    #[must_use]
    pub fn new(name: impl Into<String>, reason: impl Into<PauseReason>, pauses: usize) -> Self {
        Self {
            name: name.into(),
            pause: Pause::new(reason),
            pauses,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the payload attached to each pause.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.pause = self.pause.with_payload(payload);
        self
    }

    /// Returns the number of times the step ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C, T> Step<C, T> for PausingStep
where
    C: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &C, doc: &T) -> StepResult<T> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.pauses {
            return Ok(Outcome::Pause(self.pause.clone()));
        }
        Ok(Outcome::Progress(doc.clone()))
    }
}

/// A step that panics.
#[derive(Debug)]
pub struct PanickingStep {
    name: String,
    message: String,
}

impl PanickingStep {
    /// Creates a new panicking step.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl<C, T> Step<C, T> for PanickingStep
where
    C: Send + Sync,
    T: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &C, _doc: &T) -> StepResult<T> {
        panic!("{}", self.message);
    }
}

/// A step that records every document it sees.
#[derive(Debug)]
pub struct RecordingStep<T> {
    name: String,
    seen: Mutex<Vec<T>>,
}

impl<T: Clone> RecordingStep<T> {
    /// Creates a new recording step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns the documents seen so far.
    #[must_use]
    pub fn seen(&self) -> Vec<T> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl<C, T> Step<C, T> for RecordingStep<T>
where
    C: Send + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &C, doc: &T) -> StepResult<T> {
        self.seen.lock().push(doc.clone());
        Ok(Outcome::Progress(doc.clone()))
    }
}
