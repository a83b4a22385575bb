//! Testing utilities for docflow pipelines.
//!
//! This module provides:
//! - Step doubles that count, fail, pause, sleep or panic
//! - Assertions for stream events and emitted lifecycle events
//! - Helpers that drive a pipeline through its pauses

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_done, assert_emitted, assert_event_kinds, assert_paused, assert_progress,
};
pub use fixtures::{collect_events, drive_to_completion};
pub use mocks::{
    CountingStep, FlakyStep, PanickingStep, PausingStep, RecordingStep, SlowStep,
};
