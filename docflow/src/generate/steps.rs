//! The generative request steps.

use super::sanitize::sanitize_json_text;
use super::{GenerateContext, GenerateDoc, Validation};
use crate::core::{Outcome, Pause, StepResult};
use crate::errors::StepError;
use crate::steps::Step;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Pause reason for a result the validator refused.
pub const REJECTED: &str = "rejected";

fn pass(doc: &GenerateDoc) -> StepResult<GenerateDoc> {
    Ok(Outcome::Progress(doc.clone()))
}

fn missing(field: &str) -> StepError {
    StepError::failed(format!("generate document has no {field}"))
}

/// Renders the request as a wire payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildPayload;

#[async_trait]
impl Step<GenerateContext, GenerateDoc> for BuildPayload {
    fn name(&self) -> &str {
        "build-payload"
    }

    async fn run(&self, _ctx: &GenerateContext, doc: &GenerateDoc) -> StepResult<GenerateDoc> {
        if doc.payload.is_some() {
            return pass(doc);
        }
        Ok(Outcome::Progress(GenerateDoc {
            payload: Some(doc.request.to_payload()),
            ..doc.clone()
        }))
    }
}

/// Sends the payload through the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendRequest;

#[async_trait]
impl Step<GenerateContext, GenerateDoc> for SendRequest {
    fn name(&self) -> &str {
        "send-request"
    }

    async fn run(&self, ctx: &GenerateContext, doc: &GenerateDoc) -> StepResult<GenerateDoc> {
        if doc.response.is_some() {
            return pass(doc);
        }
        let payload = doc.payload.as_ref().ok_or_else(|| missing("payload"))?;
        let response = ctx.services().backend.send(payload).await?;
        Ok(Outcome::Progress(GenerateDoc {
            response: Some(response),
            ..doc.clone()
        }))
    }
}

/// Pulls the generated text out of the response envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractText;

#[async_trait]
impl Step<GenerateContext, GenerateDoc> for ExtractText {
    fn name(&self) -> &str {
        "extract-text"
    }

    async fn run(&self, ctx: &GenerateContext, doc: &GenerateDoc) -> StepResult<GenerateDoc> {
        if doc.raw_text.is_some() {
            return pass(doc);
        }
        let response = doc.response.as_ref().ok_or_else(|| missing("response"))?;
        let pointer = &ctx.services().config.extract_pointer;
        let raw_text = match response.pointer(pointer) {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Null) | None => {
                return Err(StepError::failed(format!(
                    "response has no content at {pointer}"
                )))
            }
            Some(other) => other.to_string(),
        };
        Ok(Outcome::Progress(GenerateDoc {
            raw_text: Some(raw_text),
            ..doc.clone()
        }))
    }
}

/// Repairs the text and parses it as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseJson;

#[async_trait]
impl Step<GenerateContext, GenerateDoc> for ParseJson {
    fn name(&self) -> &str {
        "parse-json"
    }

    async fn run(&self, _ctx: &GenerateContext, doc: &GenerateDoc) -> StepResult<GenerateDoc> {
        if doc.parsed.is_some() {
            return pass(doc);
        }
        let raw = doc.raw_text.as_deref().ok_or_else(|| missing("raw text"))?;
        let sanitized = sanitize_json_text(raw);
        if sanitized != raw {
            debug!(before = raw.len(), after = sanitized.len(), "repaired generated JSON");
        }
        let parsed: serde_json::Value = serde_json::from_str(&sanitized)?;
        Ok(Outcome::Progress(GenerateDoc {
            sanitized: Some(sanitized),
            parsed: Some(parsed),
            ..doc.clone()
        }))
    }
}

/// Runs the caller's validator over the parsed value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateResult;

#[async_trait]
impl Step<GenerateContext, GenerateDoc> for ValidateResult {
    fn name(&self) -> &str {
        "validate-result"
    }

    async fn run(&self, ctx: &GenerateContext, doc: &GenerateDoc) -> StepResult<GenerateDoc> {
        if doc.result.is_some() {
            return pass(doc);
        }
        let parsed = doc.parsed.as_ref().ok_or_else(|| missing("parsed value"))?;
        let verdict = ctx
            .services()
            .validator
            .as_ref()
            .map_or(Validation::Accept, |validate| validate(parsed));

        let result = match verdict {
            Validation::Accept => parsed.clone(),
            Validation::Replace(value) => value,
            Validation::Reject(reason) => {
                warn!(reason = %reason, "generated result rejected");
                return Ok(Outcome::Pause(Pause::new(REJECTED).with_message(reason)));
            }
        };
        Ok(Outcome::Progress(GenerateDoc {
            result: Some(result),
            ..doc.clone()
        }))
    }
}
