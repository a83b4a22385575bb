//! Comprehensive tests for generative requests.

#[cfg(test)]
mod tests {
    use crate::context::Policy;
    use crate::errors::{PipelineError, StepError};
    use crate::generate::backend::MockGenerativeBackend;
    use crate::generate::{
        generate_json, GenerateConfig, GenerateContext, GenerateRequest, Generator, Validation,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn envelope(content: &str) -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    fn replying(content: &'static str, times: usize) -> MockGenerativeBackend {
        let mut mock = MockGenerativeBackend::new();
        mock.expect_send()
            .times(times)
            .returning(move |_| Ok(envelope(content)));
        mock
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new("test-model")
            .system("Reply with JSON.")
            .user("What is the answer?")
    }

    fn ctx(generator: Generator) -> Arc<GenerateContext> {
        Arc::new(GenerateContext::with_services(generator))
    }

    #[tokio::test]
    async fn test_fenced_reply_is_repaired_and_parsed() {
        let mut mock = MockGenerativeBackend::new();
        mock.expect_send()
            .withf(|payload| {
                payload["model"] == "test-model"
                    && payload["messages"][1]["content"] == "What is the answer?"
                    && payload["response_format"]["json_schema"]["schema"]["type"] == "object"
            })
            .times(1)
            .returning(|_| Ok(envelope("```json\n{\"answer\": 42,}\n```")));

        let request = request().with_schema(json!({"type": "object"}));
        let value = generate_json(ctx(Generator::new(Arc::new(mock))), request)
            .await
            .unwrap();
        assert_eq!(value, json!({"answer": 42}));
    }

    #[tokio::test]
    async fn test_non_string_content_is_used_as_json() {
        let mut mock = MockGenerativeBackend::new();
        mock.expect_send()
            .returning(|_| Ok(json!({"output": {"answer": [1, 2]}})));
        let generator = Generator::new(Arc::new(mock))
            .with_config(GenerateConfig::default().with_extract_pointer("/output"));

        let value = generate_json(ctx(generator), request()).await.unwrap();
        assert_eq!(value, json!({"answer": [1, 2]}));
    }

    #[tokio::test]
    async fn test_validator_can_replace_result() {
        let generator = Generator::new(Arc::new(replying("{\"answer\": \"42\"}", 1)))
            .with_validator(|value| {
                let parsed = value["answer"].as_str().and_then(|s| s.parse::<i64>().ok());
                parsed.map_or_else(
                    || Validation::Reject("answer is not numeric".to_string()),
                    |n| Validation::Replace(json!({"answer": n})),
                )
            });

        let value = generate_json(ctx(generator), request()).await.unwrap();
        assert_eq!(value, json!({"answer": 42}));
    }

    #[tokio::test]
    async fn test_rejection_reruns_whole_cycle() {
        let verdicts = Arc::new(AtomicUsize::new(0));
        let seen = verdicts.clone();
        let generator = Generator::new(Arc::new(replying("{\"answer\": 42}", 2)))
            .with_validator(move |_| {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Validation::Reject("first try".to_string())
                } else {
                    Validation::Accept
                }
            });

        let value = generate_json(ctx(generator), request()).await.unwrap();
        assert_eq!(value, json!({"answer": 42}));
        assert_eq!(verdicts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejections_exhaust_validation_retries() {
        let generator = Generator::new(Arc::new(replying("{\"answer\": 41}", 3)))
            .with_config(GenerateConfig::default().with_validation_retries(2))
            .with_validator(|_| Validation::Reject("wrong answer".to_string()));

        let err = generate_json(ctx(generator), request()).await.unwrap_err();
        match err {
            PipelineError::ValidationExhausted { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, "wrong answer");
            }
            other => panic!("expected validation exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_blocks_after_retries() {
        let mut mock = MockGenerativeBackend::new();
        mock.expect_send()
            .times(3)
            .returning(|_| Err(StepError::http("429 Too Many Requests")));
        let ctx = Arc::new(
            GenerateContext::with_services(Generator::new(Arc::new(mock)))
                .with_policy(Policy::new().with_retries(2)),
        );

        let err = generate_json(ctx, request()).await.unwrap_err();
        match err {
            PipelineError::Blocked { step, reason, .. } => {
                assert_eq!(step, 1);
                assert_eq!(reason, "retryExceeded");
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparsable_text_blocks_at_parse_step() {
        let generator = Generator::new(Arc::new(replying("The answer is 42.", 1)));
        let err = generate_json(ctx(generator), request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Blocked { step: 3, ref reason, .. } if reason == "error"));
    }

    #[tokio::test]
    async fn test_missing_content_blocks_at_extract_step() {
        let mut mock = MockGenerativeBackend::new();
        mock.expect_send().returning(|_| Ok(json!({"choices": []})));
        let err = generate_json(ctx(Generator::new(Arc::new(mock))), request())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Blocked { step: 2, .. }));
    }

    #[test]
    fn test_payload_omits_unset_options() {
        let payload = GenerateRequest::new("m").user("hi").to_payload();
        assert_eq!(
            payload,
            json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
        );

        let payload = GenerateRequest::new("m").with_temperature(0.5).to_payload();
        assert_eq!(payload["temperature"], json!(0.5));
    }
}
