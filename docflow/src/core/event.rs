//! Resume tokens and the events a streaming run yields.

use super::Pause;
use serde::{Deserialize, Serialize};

/// Checkpoint needed to continue a paused or partially streamed run.
///
/// Callers should treat it as opaque. It serializes to
/// `{ "nextStep": n, "doc": ..., "fingerprint": "..." }` and is only valid
/// against the step list that produced it; the fingerprint lets the engine
/// reject tokens from a different step list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState<T> {
    /// Zero-based index of the step to run next.
    pub next_step: usize,
    /// The document at that point.
    pub doc: T,
    /// Fingerprint of the step list that issued the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl<T> ResumeState<T> {
    /// Creates an unsigned token.
    #[must_use]
    pub const fn new(next_step: usize, doc: T) -> Self {
        Self {
            next_step,
            doc,
            fingerprint: None,
        }
    }

    /// Attaches a step-list fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// One event of a streaming run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    /// Step `index` completed; `resume` points at `index + 1`.
    Progress {
        /// Index of the completed step.
        index: usize,
        /// The document after the step.
        doc: T,
        /// Token that continues after this step.
        resume: ResumeState<T>,
    },
    /// Step `index` paused; `resume` re-enters the same step.
    Pause {
        /// Index of the pausing step.
        index: usize,
        /// The document as it was before the pausing step.
        doc: T,
        /// Why the step paused.
        pause: Pause,
        /// Token that re-runs the pausing step.
        resume: ResumeState<T>,
    },
    /// No steps remain.
    Done {
        /// The final document.
        doc: T,
    },
}

impl<T> StreamEvent<T> {
    /// Returns the event kind as a string.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Pause { .. } => "pause",
            Self::Done { .. } => "done",
        }
    }

    /// Returns the document carried by the event.
    #[must_use]
    pub const fn doc(&self) -> &T {
        match self {
            Self::Progress { doc, .. } | Self::Pause { doc, .. } | Self::Done { doc } => doc,
        }
    }

    /// Returns the resume token, if the event carries one.
    #[must_use]
    pub const fn resume(&self) -> Option<&ResumeState<T>> {
        match self {
            Self::Progress { resume, .. } | Self::Pause { resume, .. } => Some(resume),
            Self::Done { .. } => None,
        }
    }

    /// Returns true for `Pause`.
    #[must_use]
    pub const fn is_pause(&self) -> bool {
        matches!(self, Self::Pause { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resume_state_wire_format() {
        let token = ResumeState::new(2, serde_json::json!({"text": "a"}));
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json, serde_json::json!({"nextStep": 2, "doc": {"text": "a"}}));

        let signed = token.with_fingerprint("abc");
        let json = serde_json::to_value(&signed).unwrap();
        assert_eq!(json["fingerprint"], "abc");
    }

    #[test]
    fn test_resume_state_without_fingerprint_deserializes() {
        let token: ResumeState<String> =
            serde_json::from_str(r#"{"nextStep": 1, "doc": "x"}"#).unwrap();
        assert_eq!(token.next_step, 1);
        assert_eq!(token.doc, "x");
        assert!(token.fingerprint.is_none());
    }

    #[test]
    fn test_event_accessors() {
        let event = StreamEvent::Progress {
            index: 0,
            doc: 5,
            resume: ResumeState::new(1, 5),
        };
        assert_eq!(event.kind(), "progress");
        assert_eq!(*event.doc(), 5);
        assert_eq!(event.resume().map(|r| r.next_step), Some(1));

        let done: StreamEvent<i32> = StreamEvent::Done { doc: 9 };
        assert_eq!(done.kind(), "done");
        assert!(done.resume().is_none());
        assert!(!done.is_pause());
    }
}
