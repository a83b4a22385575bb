//! Where lifecycle events go.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn, Level};

/// Receives the engine's lifecycle events.
///
/// Event types are dotted names such as `pipeline.started`,
/// `step.completed`, `step.failed` and `step.paused`; the payload carries
/// at least `pipeline` and `run_id`.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, awaiting any I/O the sink does.
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event from synchronous code.
    ///
    /// Must never panic; sinks swallow their own failures.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards everything. Used when a context has no sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`.
///
/// Routine events go out at the configured level. `step.failed` and
/// `step.paused` are never logged below warn.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Logs routine events at `level`.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs routine events at debug.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn level_for(&self, event_type: &str) -> Level {
        match event_type {
            "step.failed" | "step.paused" if self.level > Level::WARN => Level::WARN,
            _ => self.level,
        }
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let field = |key: &str| {
            data.and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let pipeline = field("pipeline");
        let step = field("step");
        let detail = data.map(ToString::to_string).unwrap_or_default();
        match self.level_for(event_type) {
            Level::TRACE | Level::DEBUG => {
                debug!(%pipeline, %step, %detail, "{event_type}");
            }
            Level::INFO => {
                info!(%pipeline, %step, %detail, "{event_type}");
            }
            _ => {
                warn!(%pipeline, %step, %detail, "{event_type}");
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// One event held by a [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Dotted event type.
    pub event_type: String,
    /// Payload as emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RecordedEvent {
    /// Reads a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Returns just the event types, in order.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Returns events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops every event.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn push(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
        });
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failures_and_pauses_log_at_warn_or_above() {
        let quiet = LoggingEventSink::debug();
        assert_eq!(quiet.level_for("step.completed"), Level::DEBUG);
        assert_eq!(quiet.level_for("step.failed"), Level::WARN);
        assert_eq!(quiet.level_for("step.paused"), Level::WARN);

        let loud = LoggingEventSink::new(Level::ERROR);
        assert_eq!(loud.level_for("step.paused"), Level::ERROR);
    }

    #[tokio::test]
    async fn test_logging_and_noop_sinks_accept_any_payload() {
        let sink = LoggingEventSink::default();
        sink.emit("step.completed", Some(json!({"pipeline": "p", "step": "s"}))).await;
        sink.try_emit("step.paused", None);
        NoOpEventSink.try_emit("step.failed", Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_collecting_sink_keeps_order_and_payloads() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("pipeline.started", Some(json!({"pipeline": "p"}))).await;
        sink.try_emit("step.completed", Some(json!({"index": 0})));
        sink.try_emit("step.paused", Some(json!({"index": 1, "reason": "awaiting-input"})));

        assert_eq!(sink.types(), ["pipeline.started", "step.completed", "step.paused"]);
        assert_eq!(sink.events_of_type("step.").len(), 2);
        let paused = &sink.events()[2];
        assert_eq!(paused.get("reason"), Some(&json!("awaiting-input")));
        assert_eq!(paused.get("missing"), None);

        sink.clear();
        assert_eq!(sink.len(), 0);
    }
}
