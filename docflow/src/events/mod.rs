//! Event sinks for pipeline observability.
//!
//! A context hands the engine an [`EventSink`]; the engine reports run and
//! step lifecycle events to it (`pipeline.started`, `step.completed`,
//! `step.paused`, `step.failed`, `pipeline.completed`).

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};
