//! Comprehensive integration tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::cache::InMemoryCache;
    use crate::combinators::{with_cache, with_retry, with_timeout, StepExt};
    use crate::context::{Context, Policy, StopCondition};
    use crate::core::{Outcome, PauseReason, ResumeState, StreamEvent};
    use crate::errors::ResumeError;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{FailureMode, Pipeline, RunOutcome};
    use crate::steps::{FnStep, SharedStep, Step};
    use crate::testing::{
        assert_done, assert_emitted, assert_event_kinds, assert_paused, assert_progress,
        collect_events, drive_to_completion, CountingStep, FlakyStep, PanickingStep, PausingStep,
        RecordingStep, SlowStep,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn add(n: i32) -> FnStep<impl Fn(&(), &i32) -> crate::core::StepResult<i32> + Send + Sync> {
        FnStep::new(format!("add{n}"), move |_: &(), doc: &i32| Ok(Outcome::Progress(doc + n)))
    }

    fn adder_pipeline() -> Pipeline<(), i32> {
        Pipeline::new("adders", ())
            .add_step(add(1))
            .add_step(add(10))
            .add_step(add(100))
    }

    #[tokio::test]
    async fn test_run_applies_every_step() {
        assert_eq!(adder_pipeline().run(0).await, 111);
    }

    #[tokio::test]
    async fn test_stream_yields_progress_then_done() {
        let pipeline = adder_pipeline();
        let events = collect_events(&pipeline, 0, None).await.unwrap();

        assert_event_kinds(&events, &["progress", "progress", "progress", "done"]);
        assert_eq!(*assert_progress(&events[0]), 1);
        assert_eq!(*assert_progress(&events[1]), 11);
        assert_eq!(*assert_done(&events[3]), 111);

        let token = events[1].resume().unwrap();
        assert_eq!(token.next_step, 2);
        assert_eq!(token.doc, 11);
        assert_eq!(token.fingerprint.as_deref(), Some(pipeline.fingerprint().as_str()));
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_done_immediately() {
        let pipeline: Pipeline<(), i32> = Pipeline::new("empty", ());
        assert!(pipeline.is_empty());
        let events = collect_events(&pipeline, 9, None).await.unwrap();
        assert_event_kinds(&events, &["done"]);
        assert_eq!(pipeline.run(9).await, 9);
    }

    #[tokio::test]
    async fn test_resuming_from_any_progress_token_matches_full_run() {
        let pipeline = adder_pipeline();
        let full = collect_events(&pipeline, 0, None).await.unwrap();

        for (i, event) in full[..3].iter().enumerate() {
            let token = event.resume().cloned().unwrap();
            let resumed = collect_events(&pipeline, -1, Some(token)).await.unwrap();
            assert_eq!(resumed, full[i + 1..].to_vec());
        }
    }

    #[tokio::test]
    async fn test_cached_step_runs_once_across_pipeline_runs() {
        let cache: Arc<InMemoryCache<i32>> = Arc::new(InMemoryCache::new());
        let ctx = Context::<i32>::new().with_policy(Policy::new().with_cache(cache));
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let double = FnStep::new("double", move |_: &Context<i32>, doc: &i32| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Progress(doc * 2))
        });
        let pipeline = Pipeline::new("cached", ctx)
            .add_step(with_cache(double, |doc: &i32| format!("double:{doc}")));

        assert_eq!(pipeline.run(21).await, 42);
        assert_eq!(pipeline.run(21).await, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(pipeline.run(5).await, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pause_reenters_the_same_step() {
        let before = Arc::new(CountingStep::new("before"));
        let gate = Arc::new(PausingStep::new("gate", "awaiting-input", 1));
        let after = Arc::new(RecordingStep::new("after"));
        let pipeline = Pipeline::new("gated", ())
            .add_shared_step(before.clone())
            .add_shared_step(gate.clone())
            .add_shared_step(after.clone());

        let first = collect_events(&pipeline, 5, None).await.unwrap();
        assert_event_kinds(&first, &["progress", "pause"]);
        assert_paused(&first[1], "awaiting-input");
        let token = first[1].resume().cloned().unwrap();
        assert_eq!(token.next_step, 1);
        assert!(after.seen().is_empty());

        let second = collect_events(&pipeline, 0, Some(token)).await.unwrap();
        assert_event_kinds(&second, &["progress", "progress", "done"]);
        assert_eq!(before.calls(), 1);
        assert_eq!(gate.calls(), 2);
        assert_eq!(after.seen(), vec![5]);
    }

    #[tokio::test]
    async fn test_driver_folds_pauses_until_the_gate_opens() {
        let gate = FnStep::new("gate", |_: &(), doc: &i32| {
            if *doc < 3 {
                Ok(Outcome::pause(PauseReason::from("awaiting-input")))
            } else {
                Ok(Outcome::Progress(doc * 10))
            }
        });
        let pipeline = Pipeline::new("gated", ()).add_step(add(1)).add_step(gate);

        let events = drive_to_completion(&pipeline, 0, 10, |_, mut token| {
            token.doc += 1;
            token
        })
        .await
        .unwrap();
        assert_event_kinds(&events, &["progress", "pause", "pause", "progress", "done"]);
        assert_eq!(*assert_done(events.last().unwrap()), 30);
    }

    #[tokio::test]
    async fn test_pause_event_carries_document_before_the_step() {
        let pipeline = Pipeline::new("pause-doc", ())
            .add_step(add(1))
            .add_step(PausingStep::new("gate", PauseReason::Timeout, 1));

        let events = collect_events(&pipeline, 1, None).await.unwrap();
        match &events[1] {
            StreamEvent::Pause { index, doc, resume, .. } => {
                assert_eq!(*index, 1);
                assert_eq!(*doc, 2);
                assert_eq!(resume.doc, 2);
            }
            other => panic!("expected pause, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_step_errors_are_swallowed_by_default() {
        let pipeline = Pipeline::new("lenient", ())
            .add_step(add(1))
            .add_step(FlakyStep::always("broken"))
            .add_step(PanickingStep::new("panics", "kaboom"))
            .add_step(add(10));

        let events = collect_events(&pipeline, 0, None).await.unwrap();
        assert_event_kinds(&events, &["progress", "progress", "progress", "progress", "done"]);
        assert_eq!(*assert_progress(&events[1]), 1);
        assert_eq!(*assert_progress(&events[2]), 1);
        assert_eq!(*assert_done(&events[4]), 11);
    }

    #[tokio::test]
    async fn test_failure_mode_pause_turns_errors_into_pauses() {
        let pipeline = Pipeline::new("strict", ())
            .with_failure_mode(FailureMode::Pause)
            .add_step(add(1))
            .add_step(FlakyStep::new("flaky", 1))
            .add_step(add(10));

        let first = collect_events(&pipeline, 0, None).await.unwrap();
        let pause = assert_paused(&first[1], "error");
        assert_eq!(pause.message.as_deref(), Some("flaky failed on call 1"));

        let token = first[1].resume().cloned().unwrap();
        let second = collect_events(&pipeline, 0, Some(token)).await.unwrap();
        assert_eq!(*assert_done(second.last().unwrap()), 11);
    }

    #[tokio::test]
    async fn test_done_outcome_is_unwrapped_and_continues() {
        let finish = FnStep::new("finish-early", |_: &(), doc: &i32| Ok(Outcome::Done(doc * 3)));
        let pipeline = Pipeline::new("done", ()).add_step(finish).add_step(add(1));
        assert_eq!(pipeline.run(2).await, 7);
    }

    #[tokio::test]
    async fn test_run_stops_at_first_pause() {
        let tail = Arc::new(CountingStep::new("tail"));
        let pipeline = Pipeline::new("blocked", ())
            .add_step(add(1))
            .add_step(PausingStep::new("gate", "awaiting-input", usize::MAX))
            .add_shared_step(tail.clone());

        assert_eq!(pipeline.run(0).await, 1);
        assert_eq!(tail.calls(), 0);
    }

    #[tokio::test]
    async fn test_run_until_blocked_reports_the_blocker() {
        let pipeline = Pipeline::new("blocked", ())
            .add_step(add(1))
            .add_step(PausingStep::new("gate", "awaiting-input", 1));

        match pipeline.run_until_blocked(0, None).await.unwrap() {
            RunOutcome::Paused { step, doc, pause, resume } => {
                assert_eq!(step, 1);
                assert_eq!(doc, 1);
                assert_eq!(pause.reason.as_str(), "awaiting-input");
                let finished = pipeline.run_until_blocked(0, Some(resume)).await.unwrap();
                assert!(finished.is_completed());
                assert_eq!(finished.into_document(), 1);
            }
            other => panic!("expected a pause, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_next_runs_exactly_one_step() {
        let pipeline = adder_pipeline();

        let first = pipeline.next(0, None).await.unwrap();
        assert_eq!(*assert_progress(&first), 1);

        let token = first.resume().cloned().unwrap();
        let second = pipeline.next(0, Some(token)).await.unwrap();
        assert_eq!(*assert_progress(&second), 11);

        let end = ResumeState::new(3, 111).with_fingerprint(pipeline.fingerprint());
        let done = pipeline.next(0, Some(end)).await.unwrap();
        assert_eq!(*assert_done(&done), 111);
    }

    #[tokio::test]
    async fn test_resume_rejects_foreign_and_out_of_range_tokens() {
        let pipeline = adder_pipeline();

        let foreign = ResumeState::new(1, 0).with_fingerprint("not-this-pipeline");
        assert!(matches!(
            pipeline.next(0, Some(foreign)).await,
            Err(ResumeError::FingerprintMismatch { .. })
        ));

        let too_far = ResumeState::new(4, 0);
        assert!(matches!(
            pipeline.stream(0, Some(too_far)),
            Err(ResumeError::StepOutOfRange { next_step: 4, step_count: 3 })
        ));

        let unsigned = ResumeState::new(2, 11);
        assert_eq!(
            *assert_done(collect_events(&pipeline, 0, Some(unsigned)).await.unwrap().last().unwrap()),
            111
        );
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_step_names_and_order() {
        let a = adder_pipeline();
        let b = Pipeline::new("adders", ())
            .add_step(add(10))
            .add_step(add(1))
            .add_step(add(100));
        assert_eq!(a.fingerprint(), adder_pipeline().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.step_names(), vec!["add1", "add10", "add100"]);
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_emitted() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx: Context<i32> = Context::new().with_event_sink(sink.clone());
        let pipeline = Pipeline::new("observed", ctx)
            .add_step(CountingStep::new("one"))
            .add_step(PausingStep::new("two", "awaiting-input", 1));

        collect_events(&pipeline, 0, None).await.unwrap();
        assert_emitted(&sink, &["pipeline.started", "step.completed", "step.paused"]);

        let events = sink.events();
        let paused = events[2].data.as_ref().unwrap();
        assert_eq!(paused["pipeline"], "observed");
        assert_eq!(paused["step"], "two");
        assert_eq!(paused["reason"], "awaiting-input");
    }

    #[tokio::test]
    async fn test_multi_strategy_step_stops_once_satisfied() {
        let late = Arc::new(CountingStep::new("late"));
        let strategies: Vec<SharedStep<(), i32>> = vec![
            Arc::new(add(5)),
            Arc::new(add(5)),
            late.clone(),
        ];
        let stop: StopCondition<i32> = Arc::new(|doc: &i32| *doc >= 10);
        let pipeline = Pipeline::new("strategies", ())
            .add_multi_strategy_step("refine", strategies, Some(stop))
            .add_step(add(1));

        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.run(0).await, 11);
        assert_eq!(late.calls(), 0);
    }

    #[tokio::test]
    async fn test_multi_strategy_step_pause_reenters_whole_slot() {
        let first = Arc::new(CountingStep::new("first"));
        let strategies: Vec<SharedStep<(), i32>> = vec![
            first.clone(),
            Arc::new(PausingStep::new("gate", "awaiting-input", 1)),
        ];
        let pipeline = Pipeline::new("slot", ()).add_multi_strategy_step("slot", strategies, None);

        let events = collect_events(&pipeline, 0, None).await.unwrap();
        let token = events[0].resume().cloned().unwrap();
        assert_eq!(token.next_step, 0);
        collect_events(&pipeline, 0, Some(token)).await.unwrap();
        assert_eq!(first.calls(), 2);
    }

    #[tokio::test]
    async fn test_retry_inside_pipeline() {
        let flaky = Arc::new(FlakyStep::new("flaky", 2));
        let ctx: Context<i32> = Context::new().with_policy(Policy::new().with_retries(2));
        let pipeline = Pipeline::new("retrying", ctx).add_step(with_retry(flaky.clone()));

        let events = collect_events(&pipeline, 4, None).await.unwrap();
        assert_event_kinds(&events, &["progress", "done"]);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_pauses_pipeline() {
        let ctx: Context<i32> = Context::new().with_policy(Policy::new().with_retries(1));
        let pipeline = Pipeline::new("exhausted", ctx)
            .add_step(FlakyStep::always("down").with_retry());

        let events = collect_events(&pipeline, 4, None).await.unwrap();
        let pause = assert_paused(&events[0], "retryExceeded");
        assert_eq!(pause.payload, Some(serde_json::json!(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_inside_pipeline() {
        let ctx: Context<i32> = Context::new().with_policy(Policy::new().with_timeout_ms(20));
        let pipeline = Pipeline::new("slow", ctx)
            .add_step(with_timeout(SlowStep::with_delay_ms("slow", 1_000)));

        let events = collect_events(&pipeline, 3, None).await.unwrap();
        assert_paused(&events[0], "timeout");
    }

    #[tokio::test]
    async fn test_shared_context_between_pipelines() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = Arc::new(Context::<i32>::new().with_event_sink(sink.clone()));
        let first = Pipeline::with_shared_context("first", Arc::clone(&ctx))
            .add_step(CountingStep::new("a"));
        let second = Pipeline::with_shared_context("second", ctx).add_step(CountingStep::new("b"));

        first.run(0).await;
        second.run(0).await;
        assert_eq!(sink.events_of_type("pipeline.completed").len(), 2);
    }

    #[tokio::test]
    async fn test_steps_see_the_context() {
        #[derive(Debug)]
        struct Offset(i32);

        let ctx: Context<i32, Offset> = Context::with_services(Offset(40));
        let step = FnStep::new("offset", |ctx: &Context<i32, Offset>, doc: &i32| {
            Ok(Outcome::Progress(doc + ctx.services().0))
        });
        assert_eq!(Step::<Context<i32, Offset>, i32>::name(&step), "offset");
        let pipeline = Pipeline::new("services", ctx).add_step(step);
        assert_eq!(pipeline.run(2).await, 42);
    }
}
