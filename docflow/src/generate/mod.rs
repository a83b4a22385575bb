//! Single-shot generative requests that return JSON.
//!
//! The pipeline builds a request payload, sends it (retry and timeout per
//! the context policy), extracts the generated text from the response
//! envelope, repairs and parses it, and finally lets the caller accept,
//! replace or reject the value. A rejection reruns the whole cycle.

mod backend;
mod sanitize;
mod steps;

#[cfg(feature = "http")]
pub use backend::HttpBackend;
pub use backend::GenerativeBackend;
pub use sanitize::{close_unbalanced, remove_trailing_commas, sanitize_json_text, strip_fences};
pub use steps::{BuildPayload, ExtractText, ParseJson, SendRequest, ValidateResult, REJECTED};

#[cfg(test)]
mod generate_tests;

use crate::combinators::{with_retry, with_timeout};
use crate::context::Context;
use crate::core::PauseReason;
use crate::errors::{PipelineError, StepError};
use crate::pipeline::{FailureMode, Pipeline, RunOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// What to ask the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// JSON schema the response must follow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    /// Creates a request with no messages.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            schema: None,
            temperature: None,
        }
    }

    /// Appends a system message.
    #[must_use]
    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::new("system", content));
        self
    }

    /// Appends a user message.
    #[must_use]
    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::new("user", content));
        self
    }

    /// Constrains the response to a JSON schema.
    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Renders the chat-completions wire payload.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "model": self.model,
            "messages": self.messages,
        });
        if let Some(temperature) = self.temperature {
            payload["temperature"] = serde_json::json!(temperature);
        }
        if let Some(schema) = &self.schema {
            payload["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema, "strict": true },
            });
        }
        payload
    }
}

/// Generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    /// JSON pointer to the generated text inside the response.
    pub extract_pointer: String,
    /// Whole-cycle reruns after a validator rejection.
    pub validation_retries: u32,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            extract_pointer: "/choices/0/message/content".to_string(),
            validation_retries: 1,
        }
    }
}

impl GenerateConfig {
    /// Sets the response pointer.
    #[must_use]
    pub fn with_extract_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.extract_pointer = pointer.into();
        self
    }

    /// Sets the validation reruns.
    #[must_use]
    pub const fn with_validation_retries(mut self, retries: u32) -> Self {
        self.validation_retries = retries;
        self
    }
}

/// A validator's verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Keep the parsed value.
    Accept,
    /// Use this value instead.
    Replace(serde_json::Value),
    /// Refuse the value; the cycle may be rerun.
    Reject(String),
}

/// Caller-supplied check over the parsed value.
pub type Validator = Arc<dyn Fn(&serde_json::Value) -> Validation + Send + Sync>;

/// Collaborators the generate steps read from the context.
#[derive(Clone)]
pub struct Generator {
    /// Transport.
    pub backend: Arc<dyn GenerativeBackend>,
    /// Settings.
    pub config: GenerateConfig,
    /// Optional result check.
    pub validator: Option<Validator>,
}

impl Generator {
    /// Creates the generate services with default settings.
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            config: GenerateConfig::default(),
            validator: None,
        }
    }

    /// Sets the settings.
    #[must_use]
    pub fn with_config(mut self, config: GenerateConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the validator.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Validation + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("config", &self.config)
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// The context generate pipelines run against.
pub type GenerateContext = Context<GenerateDoc, Generator>;

/// The evolving generate document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateDoc {
    /// The request.
    pub request: GenerateRequest,
    /// Wire payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Response envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    /// Generated text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Text after repairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
    /// Parsed value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
    /// Validated value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl GenerateDoc {
    /// Creates a document for `request`.
    pub const fn new(request: GenerateRequest) -> Self {
        Self {
            request,
            payload: None,
            response: None,
            raw_text: None,
            sanitized: None,
            parsed: None,
            result: None,
        }
    }
}

/// Builds the five-step generate pipeline.
pub fn generate_pipeline(ctx: Arc<GenerateContext>) -> Pipeline<GenerateContext, GenerateDoc> {
    Pipeline::with_shared_context("generate-json", ctx)
        .with_failure_mode(FailureMode::Pause)
        .add_step(BuildPayload)
        .add_step(with_timeout(with_retry(SendRequest)))
        .add_step(ExtractText)
        .add_step(ParseJson)
        .add_step(ValidateResult)
}

/// Generates and validates one JSON value.
///
/// A rejection reruns the whole cycle, request included, up to
/// `validation_retries` more times before failing with
/// [`PipelineError::ValidationExhausted`]. Any other pause fails with
/// [`PipelineError::Blocked`].
pub async fn generate_json(
    ctx: Arc<GenerateContext>,
    request: GenerateRequest,
) -> Result<serde_json::Value, PipelineError> {
    let attempts = ctx.services().config.validation_retries.saturating_add(1);
    let pipeline = generate_pipeline(ctx);
    let rejected = PauseReason::from(REJECTED);
    let mut last_reason = String::new();

    for attempt in 1..=attempts {
        match pipeline
            .run_until_blocked(GenerateDoc::new(request.clone()), None)
            .await?
        {
            RunOutcome::Completed(doc) => {
                info!(attempt, "generated a valid result");
                return doc
                    .result
                    .ok_or_else(|| StepError::failed("generation finished without a result").into());
            }
            RunOutcome::Paused { pause, .. } if pause.reason == rejected => {
                last_reason = pause.message.unwrap_or_default();
                warn!(attempt, attempts, reason = %last_reason, "validation rejected the result");
            }
            RunOutcome::Paused { step, pause, .. } => {
                return Err(PipelineError::Blocked {
                    step,
                    reason: pause.reason.to_string(),
                    message: pause.message,
                });
            }
        }
    }

    Err(PipelineError::ValidationExhausted {
        attempts,
        reason: last_reason,
    })
}
