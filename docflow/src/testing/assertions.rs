//! Test assertions for stream events and emitted lifecycle events.

use std::fmt::Debug;

use crate::core::{Pause, StreamEvent};
use crate::events::CollectingEventSink;

/// Asserts that the event is a progress event and returns its document.
#[track_caller]
pub fn assert_progress<T: Debug>(event: &StreamEvent<T>) -> &T {
    match event {
        StreamEvent::Progress { doc, .. } => doc,
        other => panic!("Expected progress, got: {other:?}"),
    }
}

/// Asserts that the event is a pause with the given reason and returns it.
#[track_caller]
pub fn assert_paused<'a, T: Debug>(event: &'a StreamEvent<T>, reason: &str) -> &'a Pause {
    match event {
        StreamEvent::Pause { pause, .. } => {
            assert_eq!(
                pause.reason.as_str(),
                reason,
                "Expected pause reason '{}', got '{}'",
                reason,
                pause.reason
            );
            pause
        }
        other => panic!("Expected pause '{reason}', got: {other:?}"),
    }
}

/// Asserts that the event is `Done` and returns the final document.
#[track_caller]
pub fn assert_done<T: Debug>(event: &StreamEvent<T>) -> &T {
    match event {
        StreamEvent::Done { doc } => doc,
        other => panic!("Expected done, got: {other:?}"),
    }
}

/// Asserts the sequence of event kinds (`progress`, `pause`, `done`).
#[track_caller]
pub fn assert_event_kinds<T>(events: &[StreamEvent<T>], expected: &[&str]) {
    let kinds: Vec<&str> = events.iter().map(StreamEvent::kind).collect();
    assert_eq!(kinds, expected, "Unexpected event sequence");
}

/// Asserts that the sink received events with exactly these types, in order.
#[track_caller]
pub fn assert_emitted(sink: &CollectingEventSink, expected: &[&str]) {
    assert_eq!(sink.types(), expected, "Unexpected emitted events");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PauseReason, ResumeState};
    use crate::events::EventSink;

    #[test]
    fn test_progress_and_done() {
        let progress = StreamEvent::Progress {
            index: 0,
            doc: 1,
            resume: ResumeState::new(1, 1),
        };
        assert_eq!(*assert_progress(&progress), 1);
        assert_eq!(*assert_done(&StreamEvent::Done { doc: 2 }), 2);
    }

    #[test]
    fn test_paused() {
        let event = StreamEvent::Pause {
            index: 0,
            doc: 1,
            pause: Pause::new(PauseReason::Timeout),
            resume: ResumeState::new(0, 1),
        };
        assert_eq!(assert_paused(&event, "timeout").reason, PauseReason::Timeout);
        assert_event_kinds(&[event], &["pause"]);
    }

    #[test]
    #[should_panic(expected = "Expected done")]
    fn test_done_rejects_progress() {
        let event = StreamEvent::Progress {
            index: 0,
            doc: 1,
            resume: ResumeState::new(1, 1),
        };
        assert_done(&event);
    }

    #[test]
    fn test_emitted() {
        let sink = CollectingEventSink::new();
        sink.try_emit("pipeline.started", None);
        sink.try_emit("pipeline.completed", None);
        assert_emitted(&sink, &["pipeline.started", "pipeline.completed"]);
    }
}
