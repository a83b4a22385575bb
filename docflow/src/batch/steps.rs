//! The batch lifecycle steps.
//!
//! Each step passes the document through once its phase is recorded, so a
//! resumed run replays finished phases for free.

use super::api::CreateBatchRequest;
use super::output::process_slice;
use super::{BatchContext, BatchDoc};
use crate::core::{Outcome, Pause, PauseReason, StepResult};
use crate::errors::StepError;
use crate::steps::Step;
use async_trait::async_trait;
use serde_json::json;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Pause reason while the input source still has records to give.
pub const AWAITING_INPUT: &str = "awaiting-input";

/// Pause reason while output slices remain.
pub const PROCESSING_OUTPUTS: &str = "processing-outputs";

/// Prefix of the pause reason while the remote job runs.
pub const BATCH_PREFIX: &str = "batch:";

fn pass(doc: &BatchDoc) -> StepResult<BatchDoc> {
    Ok(Outcome::Progress(doc.clone()))
}

fn missing(field: &str) -> StepError {
    StepError::failed(format!("batch document has no {field}"))
}

/// Appends records from the input source to the local input file.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildInput;

#[async_trait]
impl Step<BatchContext, BatchDoc> for BuildInput {
    fn name(&self) -> &str {
        "build-input"
    }

    async fn run(&self, ctx: &BatchContext, doc: &BatchDoc) -> StepResult<BatchDoc> {
        if doc.input_complete {
            return pass(doc);
        }
        let services = ctx.services();
        let batch = services
            .source
            .pull(doc.input_lines, services.config.max_per_tick)
            .await?;

        if let Some(parent) = doc.input_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(doc.input_lines > 0)
            .truncate(doc.input_lines == 0)
            .open(&doc.input_path)
            .await?;

        let mut lines = String::new();
        for item in &batch.items {
            match item {
                serde_json::Value::String(raw) => lines.push_str(raw),
                other => lines.push_str(&serde_json::to_string(other)?),
            }
            lines.push('\n');
        }
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        let input_lines = doc.input_lines + batch.items.len() as u64;
        debug!(
            appended = batch.items.len(),
            input_lines,
            exhausted = batch.exhausted,
            "appended input records"
        );

        if !batch.exhausted {
            let retry_after_ms = if batch.items.is_empty() {
                services.config.poll_interval_ms
            } else {
                0
            };
            return Ok(Outcome::Pause(
                Pause::new(AWAITING_INPUT).with_payload(json!({
                    "inputLines": input_lines,
                    "retryAfterMs": retry_after_ms,
                })),
            ));
        }
        if input_lines == 0 {
            return Err(StepError::failed("batch input source produced no records"));
        }
        Ok(Outcome::Progress(BatchDoc {
            input_lines,
            input_complete: true,
            ..doc.clone()
        }))
    }
}

/// Uploads the finished input file.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadInput;

#[async_trait]
impl Step<BatchContext, BatchDoc> for UploadInput {
    fn name(&self) -> &str {
        "upload-input"
    }

    async fn run(&self, ctx: &BatchContext, doc: &BatchDoc) -> StepResult<BatchDoc> {
        if doc.input_file_id.is_some() {
            return pass(doc);
        }
        if !doc.input_complete {
            return Err(StepError::failed("batch input is not complete"));
        }
        let file_id = ctx.services().api.upload_file(&doc.input_path).await?;
        info!(file_id = %file_id, lines = doc.input_lines, "uploaded batch input");
        Ok(Outcome::Progress(BatchDoc {
            input_file_id: Some(file_id),
            ..doc.clone()
        }))
    }
}

/// Creates the remote job.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateBatch;

#[async_trait]
impl Step<BatchContext, BatchDoc> for CreateBatch {
    fn name(&self) -> &str {
        "create-batch"
    }

    async fn run(&self, ctx: &BatchContext, doc: &BatchDoc) -> StepResult<BatchDoc> {
        if doc.batch_id.is_some() {
            return pass(doc);
        }
        let input_file_id = doc.input_file_id.clone().ok_or_else(|| missing("input file id"))?;
        let request = CreateBatchRequest {
            input_file_id,
            endpoint: doc.endpoint.clone(),
            completion_window: ctx.services().config.completion_window.clone(),
        };
        let job = ctx.services().api.create_batch(&request).await?;
        info!(batch_id = %job.id, status = %job.status, "created batch job");
        Ok(Outcome::Progress(BatchDoc {
            batch_id: Some(job.id.clone()),
            status: Some(job.status),
            job: Some(job),
            ..doc.clone()
        }))
    }
}

/// Fetches the job status and pauses until it is terminal.
///
/// The step never sleeps; the pause payload carries `retryAfterMs` for the
/// driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollBatch;

#[async_trait]
impl Step<BatchContext, BatchDoc> for PollBatch {
    fn name(&self) -> &str {
        "poll-batch"
    }

    async fn run(&self, ctx: &BatchContext, doc: &BatchDoc) -> StepResult<BatchDoc> {
        if doc.status.is_some_and(|s| s.is_terminal()) {
            return pass(doc);
        }
        let batch_id = doc.batch_id.as_deref().ok_or_else(|| missing("batch id"))?;
        let job = ctx.services().api.retrieve_batch(batch_id).await?;

        if !job.status.is_terminal() {
            debug!(batch_id, status = %job.status, "batch still running");
            return Ok(Outcome::Pause(
                Pause::new(PauseReason::Custom(format!("{BATCH_PREFIX}{}", job.status)))
                    .with_payload(json!({
                        "status": job.status,
                        "job": job,
                        "retryAfterMs": ctx.services().config.poll_interval_ms,
                    })),
            ));
        }

        info!(batch_id, status = %job.status, "batch reached a terminal status");
        Ok(Outcome::Progress(BatchDoc {
            status: Some(job.status),
            job: Some(job),
            ..doc.clone()
        }))
    }
}

/// Records the output and error file ids of the terminal job.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocateOutputs;

#[async_trait]
impl Step<BatchContext, BatchDoc> for LocateOutputs {
    fn name(&self) -> &str {
        "locate-outputs"
    }

    async fn run(&self, _ctx: &BatchContext, doc: &BatchDoc) -> StepResult<BatchDoc> {
        if doc.outputs_located {
            return pass(doc);
        }
        let job = doc.job.as_ref().ok_or_else(|| missing("job record"))?;
        debug!(
            output = job.output_file_id.is_some(),
            errors = job.error_file_id.is_some(),
            "located batch outputs"
        );
        Ok(Outcome::Progress(BatchDoc {
            output_file_id: job.output_file_id.clone(),
            error_file_id: job.error_file_id.clone(),
            outputs_located: true,
            ..doc.clone()
        }))
    }
}

/// Downloads whichever output files exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOutputs;

#[async_trait]
impl Step<BatchContext, BatchDoc> for DownloadOutputs {
    fn name(&self) -> &str {
        "download-outputs"
    }

    async fn run(&self, ctx: &BatchContext, doc: &BatchDoc) -> StepResult<BatchDoc> {
        if doc.outputs_downloaded {
            return pass(doc);
        }
        let api = &ctx.services().api;
        fs::create_dir_all(&doc.output_dir).await?;

        let mut output_path = None;
        if let Some(file_id) = &doc.output_file_id {
            let dest = doc.download_path(".output.jsonl");
            let bytes = api.download_file(file_id, &dest).await?;
            debug!(path = %dest.display(), bytes, "downloaded batch output");
            output_path = Some(dest);
        }
        let mut error_path = None;
        if let Some(file_id) = &doc.error_file_id {
            let dest = doc.download_path(".errors.jsonl");
            let bytes = api.download_file(file_id, &dest).await?;
            debug!(path = %dest.display(), bytes, "downloaded batch errors");
            error_path = Some(dest);
        }

        Ok(Outcome::Progress(BatchDoc {
            output_path,
            error_path,
            outputs_downloaded: true,
            ..doc.clone()
        }))
    }
}

/// Dispatches the output file one slice per invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOutputs;

#[async_trait]
impl Step<BatchContext, BatchDoc> for ProcessOutputs {
    fn name(&self) -> &str {
        "process-outputs"
    }

    async fn run(&self, ctx: &BatchContext, doc: &BatchDoc) -> StepResult<BatchDoc> {
        if doc.outputs_processed {
            return pass(doc);
        }
        let Some(path) = &doc.output_path else {
            return Ok(Outcome::Progress(BatchDoc {
                outputs_processed: true,
                ..doc.clone()
            }));
        };

        let services = ctx.services();
        let report = process_slice(
            path,
            &doc.output_cursor(),
            services.config.slice_bytes(),
            services.sink.as_ref(),
        )
        .await?;
        let cursor = report.cursor;

        if !report.at_eof {
            return Ok(Outcome::Pause(
                Pause::new(PROCESSING_OUTPUTS).with_payload(json!({
                    "outPos": cursor.pos,
                    "outRows": cursor.rows,
                    "outCarry": cursor.carry,
                    "outSkipped": cursor.skipped,
                })),
            ));
        }

        info!(rows = cursor.rows, skipped = cursor.skipped, "processed batch outputs");
        Ok(Outcome::Progress(BatchDoc {
            out_pos: cursor.pos,
            out_carry: cursor.carry,
            out_rows: cursor.rows,
            out_skipped: cursor.skipped,
            outputs_processed: true,
            ..doc.clone()
        }))
    }
}
