//! Per-record callbacks for processed output lines.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;

/// Receives each parsed output record, in file order.
///
/// `row` counts dispatched records from zero across every slice of the run.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Handles one record.
    async fn on_record(&self, record: serde_json::Value, row: u64);
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<(u64, serde_json::Value)>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records received so far with their row numbers.
    #[must_use]
    pub fn records(&self) -> Vec<(u64, serde_json::Value)> {
        self.records.lock().clone()
    }

    /// Returns the number of records received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn on_record(&self, record: serde_json::Value, row: u64) {
        self.records.lock().push((row, record));
    }
}

/// A sink backed by a closure.
pub struct FnSink<F> {
    func: F,
}

impl<F> FnSink<F>
where
    F: Fn(serde_json::Value, u64) + Send + Sync,
{
    /// Wraps `func`.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> RecordSink for FnSink<F>
where
    F: Fn(serde_json::Value, u64) + Send + Sync,
{
    async fn on_record(&self, record: serde_json::Value, row: u64) {
        (self.func)(record, row);
    }
}
