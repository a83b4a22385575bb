//! The result type every step returns.

use crate::errors::StepError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Result of invoking a step.
pub type StepResult<T> = Result<Outcome<T>, StepError>;

/// What a step produced.
///
/// `Progress` and `Done` both hand a new document to whatever runs next; a
/// `Done` marks the value as authoritative (sequences unwrap it and feed it
/// forward). `Pause` means the step could not finish and the pipeline must be
/// resumed later at the same step.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The step produced a new document.
    Progress(T),
    /// The step finished early with a final value.
    Done(T),
    /// The step could not complete and must be re-entered later.
    Pause(Pause),
}

impl<T> Outcome<T> {
    /// Creates a pause outcome.
    #[must_use]
    pub fn pause(reason: impl Into<PauseReason>) -> Self {
        Self::Pause(Pause::new(reason))
    }

    /// Returns true for `Pause`.
    #[must_use]
    pub const fn is_pause(&self) -> bool {
        matches!(self, Self::Pause(_))
    }

    /// Returns true for `Done`.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Returns the document for `Progress` or `Done`.
    #[must_use]
    pub fn into_document(self) -> Option<T> {
        match self {
            Self::Progress(doc) | Self::Done(doc) => Some(doc),
            Self::Pause(_) => None,
        }
    }

    /// Returns the pause, if any.
    #[must_use]
    pub const fn as_pause(&self) -> Option<&Pause> {
        match self {
            Self::Pause(pause) => Some(pause),
            _ => None,
        }
    }

    /// Maps the document of a non-pause outcome.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Progress(doc) => Outcome::Progress(f(doc)),
            Self::Done(doc) => Outcome::Done(f(doc)),
            Self::Pause(pause) => Outcome::Pause(pause),
        }
    }
}

impl<T> From<Pause> for Outcome<T> {
    fn from(pause: Pause) -> Self {
        Self::Pause(pause)
    }
}

/// Machine-readable cause of a pause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PauseReason {
    /// A step failed and the failure was captured.
    Error,
    /// A step's deadline elapsed.
    Timeout,
    /// Retries were used up after repeated errors.
    RetryExceeded,
    /// A domain-specific reason, such as `awaiting-input` or `batch:in_progress`.
    Custom(String),
}

impl PauseReason {
    /// Returns the wire form of the reason.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::RetryExceeded => "retryExceeded",
            Self::Custom(reason) => reason,
        }
    }

    /// Parses the wire form of a reason.
    #[must_use]
    pub fn parse(reason: &str) -> Self {
        match reason {
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            "retryExceeded" => Self::RetryExceeded,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PauseReason {
    fn from(reason: &str) -> Self {
        Self::parse(reason)
    }
}

impl From<String> for PauseReason {
    fn from(reason: String) -> Self {
        Self::parse(&reason)
    }
}

impl Serialize for PauseReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PauseReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// A non-terminal outcome: the step needs external input, time, or a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pause {
    /// Why the step paused.
    pub reason: PauseReason,
    /// Diagnostic or resumption data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Human-readable detail, usually the captured error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Pause {
    /// Creates a pause with no payload.
    #[must_use]
    pub fn new(reason: impl Into<PauseReason>) -> Self {
        Self {
            reason: reason.into(),
            payload: None,
            message: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Returns true if the reason is `error`.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.reason == PauseReason::Error
    }
}

/// Structural check for JSON step results.
///
/// Returns true iff `value` is an object with a boolean `done` key. This is
/// the only way to tell an outcome apart from a document when both are plain
/// JSON, so `done` is a reserved top-level field: a document that carries its
/// own boolean `done` will be read as an outcome.
#[must_use]
pub fn is_outcome(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("done"))
        .is_some_and(serde_json::Value::is_boolean)
}

impl Outcome<serde_json::Value> {
    /// Interprets a JSON step result structurally.
    ///
    /// - `{ "done": true, "value": v }` becomes `Done(v)` (`Null` when `value`
    ///   is missing).
    /// - `{ "done": false, "reason": r, "payload": p }` becomes a pause; a
    ///   missing reason reads as `error`.
    /// - Anything else is a plain document.
    ///
    /// The reserved-field caveat of [`is_outcome`] applies.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        if !is_outcome(&value) {
            return Self::Progress(value);
        }
        let serde_json::Value::Object(mut obj) = value else {
            return Self::Progress(serde_json::Value::Null);
        };
        if obj.get("done").and_then(serde_json::Value::as_bool) == Some(true) {
            return Self::Done(obj.remove("value").unwrap_or(serde_json::Value::Null));
        }
        let reason = obj
            .get("reason")
            .and_then(serde_json::Value::as_str)
            .map_or(PauseReason::Error, PauseReason::parse);
        let mut pause = Pause::new(reason);
        pause.payload = obj.remove("payload");
        pause.message = obj
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        Self::Pause(pause)
    }

    /// Renders the outcome in its structural JSON form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Progress(doc) => doc.clone(),
            Self::Done(value) => serde_json::json!({ "done": true, "value": value }),
            Self::Pause(pause) => {
                let mut obj = serde_json::json!({ "done": false, "reason": pause.reason.as_str() });
                if let Some(payload) = &pause.payload {
                    obj["payload"] = payload.clone();
                }
                if let Some(message) = &pause.message {
                    obj["message"] = serde_json::Value::String(message.clone());
                }
                obj
            }
        }
    }
}
