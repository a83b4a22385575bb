//! Log setup and run summaries.

mod setup;
mod wide_events;

pub use setup::init_tracing;
pub use wide_events::{RunEnd, RunSummary, WideEventSink, DEFAULT_SUMMARY_CAPACITY};
