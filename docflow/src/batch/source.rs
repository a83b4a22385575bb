//! Upstream producers of input records.

use crate::errors::StepError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

/// Items handed over by one pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputBatch {
    /// Records to append, in order.
    pub items: Vec<serde_json::Value>,
    /// True once the producer has nothing more to give.
    pub exhausted: bool,
}

/// A producer of input records.
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Returns up to `max` records following the first `already_written`.
    ///
    /// Stateless sources use `already_written` as their offset; stateful
    /// ones may ignore it.
    async fn pull(&self, already_written: u64, max: usize) -> Result<InputBatch, StepError>;
}

/// A finite in-memory list of records.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    items: Vec<serde_json::Value>,
}

impl VecSource {
    /// Creates a source over `items`.
    #[must_use]
    pub fn new(items: Vec<serde_json::Value>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl InputSource for VecSource {
    async fn pull(&self, already_written: u64, max: usize) -> Result<InputBatch, StepError> {
        let start = usize::try_from(already_written)
            .unwrap_or(usize::MAX)
            .min(self.items.len());
        let end = start.saturating_add(max).min(self.items.len());
        Ok(InputBatch {
            items: self.items[start..end].to_vec(),
            exhausted: end == self.items.len(),
        })
    }
}

/// How long one pull waits on a [`StreamSource`] by default.
pub const DEFAULT_PULL_WAIT: Duration = Duration::from_millis(100);

/// A pull-based asynchronous stream of records.
///
/// Each pull awaits records until it has `max` of them, the stream ends, or
/// the pull's wait budget runs out; whatever arrived by then is returned.
/// The stream position lives in memory: after a restart the caller must
/// rebuild the stream from the record after the last one written.
pub struct StreamSource {
    stream: Mutex<BoxStream<'static, serde_json::Value>>,
    max_wait: Duration,
}

impl StreamSource {
    /// Creates a source over `stream` that waits [`DEFAULT_PULL_WAIT`] per pull.
    pub fn new(stream: BoxStream<'static, serde_json::Value>) -> Self {
        Self {
            stream: Mutex::new(stream),
            max_wait: DEFAULT_PULL_WAIT,
        }
    }

    /// Sets how long one pull may wait for records.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InputSource for StreamSource {
    async fn pull(&self, _already_written: u64, max: usize) -> Result<InputBatch, StepError> {
        let deadline = Instant::now() + self.max_wait;
        let mut stream = self.stream.lock().await;
        let mut batch = InputBatch::default();
        while batch.items.len() < max {
            // Dropping a pending `next` on timeout loses no item.
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(item)) => batch.items.push(item),
                Ok(None) => {
                    batch.exhausted = true;
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(batch)
    }
}
