//! Helpers for driving pipelines in tests.

use futures::StreamExt;

use crate::context::StepContext;
use crate::core::{ResumeState, StreamEvent};
use crate::errors::ResumeError;
use crate::pipeline::Pipeline;

/// Collects every event of one streaming run.
pub async fn collect_events<C, T>(
    pipeline: &Pipeline<C, T>,
    doc: T,
    resume: Option<ResumeState<T>>,
) -> Result<Vec<StreamEvent<T>>, ResumeError>
where
    C: StepContext + 'static,
    T: Clone + Send + Sync + 'static,
{
    let stream = pipeline.stream(doc, resume)?;
    Ok(stream.collect().await)
}

/// Re-streams after every pause until the pipeline finishes.
///
/// `on_pause` may fold the pause into the resume token before the next run.
/// Gives up after `max_runs` streaming runs and returns every event seen.
pub async fn drive_to_completion<C, T, F>(
    pipeline: &Pipeline<C, T>,
    doc: T,
    max_runs: usize,
    mut on_pause: F,
) -> Result<Vec<StreamEvent<T>>, ResumeError>
where
    C: StepContext + 'static,
    T: Clone + Send + Sync + 'static,
    F: FnMut(&StreamEvent<T>, ResumeState<T>) -> ResumeState<T>,
{
    let mut seen = Vec::new();
    let mut resume = None;
    for _ in 0..max_runs {
        let events = collect_events(pipeline, doc.clone(), resume.take()).await?;
        let last = events.last().cloned();
        seen.extend(events);
        match last {
            Some(event @ StreamEvent::Pause { .. }) => {
                if let Some(token) = event.resume().cloned() {
                    resume = Some(on_pause(&event, token));
                }
            }
            _ => break,
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingStep, PausingStep};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_drive_to_completion_resumes_pauses() {
        let counter = Arc::new(CountingStep::new("count"));
        let pipeline = Pipeline::new("drive", ())
            .add_step(PausingStep::new("wait", "awaiting-input", 2))
            .add_shared_step(counter.clone());

        let events = drive_to_completion(&pipeline, 0_i32, 10, |_, token| token)
            .await
            .unwrap();
        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(kinds, vec!["pause", "pause", "progress", "progress", "done"]);
        assert_eq!(counter.calls(), 1);
    }
}
