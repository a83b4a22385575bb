//! The long-running batch job lifecycle.
//!
//! A batch run survives process restarts: every phase records its result in
//! the [`BatchDoc`], and every wait is a pause whose payload the driver folds
//! back into the document before persisting the resume token.
//!
//! 1. append input records to a local JSONL file (`awaiting-input` until the
//!    source is exhausted)
//! 2. upload the input file
//! 3. create the remote job
//! 4. poll until the job is terminal (`batch:<status>`)
//! 5. capture the output and error file ids
//! 6. download them to `<job id>.output.jsonl` / `<job id>.errors.jsonl`
//! 7. dispatch output records slice by slice (`processing-outputs`)
//!
//! ```rust,ignore
//! let pipeline = batch_pipeline(Arc::new(BatchContext::with_services(services)));
//! let doc = run_to_completion(&pipeline, BatchDoc::new("in.jsonl", "out", "/v1/chat/completions"), None).await?;
//! ```

mod api;
mod driver;
mod output;
mod sink;
mod source;
mod steps;

pub use api::{BatchApi, BatchJob, BatchStatus, CreateBatchRequest, RequestCounts};
pub use driver::{run_to_completion, tick, Tick};
pub use output::{process_slice, OutputCursor, SliceReport};
pub use sink::{CollectingSink, FnSink, RecordSink};
pub use source::{InputBatch, InputSource, StreamSource, VecSource, DEFAULT_PULL_WAIT};
pub use steps::{
    BuildInput, CreateBatch, DownloadOutputs, LocateOutputs, PollBatch, ProcessOutputs,
    UploadInput, AWAITING_INPUT, BATCH_PREFIX, PROCESSING_OUTPUTS,
};


use crate::combinators::{with_retry, with_timeout};
use crate::context::Context;
use crate::core::Pause;
use crate::pipeline::{FailureMode, Pipeline};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Minimum output slice, large enough to hold any UTF-8 sequence.
pub const MIN_IO_SLICE_BYTES: usize = 4;

/// Batch lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Input records pulled per tick.
    pub max_per_tick: usize,
    /// Bytes of output read per tick.
    pub io_slice_bytes: usize,
    /// Suggested delay between status polls.
    pub poll_interval_ms: u64,
    /// Completion window passed to the remote job.
    pub completion_window: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_per_tick: 1000,
            io_slice_bytes: 128 * 1024,
            poll_interval_ms: 5000,
            completion_window: "24h".to_string(),
        }
    }
}

impl BatchConfig {
    /// Sets the input records pulled per tick.
    #[must_use]
    pub const fn with_max_per_tick(mut self, max_per_tick: usize) -> Self {
        self.max_per_tick = max_per_tick;
        self
    }

    /// Sets the output slice size.
    #[must_use]
    pub const fn with_io_slice_bytes(mut self, bytes: usize) -> Self {
        self.io_slice_bytes = bytes;
        self
    }

    /// Sets the suggested poll delay.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Returns the effective slice size.
    #[must_use]
    pub fn slice_bytes(&self) -> usize {
        self.io_slice_bytes.max(MIN_IO_SLICE_BYTES)
    }
}

/// Collaborators the batch steps read from the context.
#[derive(Clone)]
pub struct BatchServices {
    /// Remote job API.
    pub api: Arc<dyn BatchApi>,
    /// Producer of input records.
    pub source: Arc<dyn InputSource>,
    /// Receiver of output records.
    pub sink: Arc<dyn RecordSink>,
    /// Settings.
    pub config: BatchConfig,
}

impl BatchServices {
    /// Creates the batch services with default settings.
    pub fn new(
        api: Arc<dyn BatchApi>,
        source: Arc<dyn InputSource>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            api,
            source,
            sink,
            config: BatchConfig::default(),
        }
    }

    /// Sets the settings.
    #[must_use]
    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for BatchServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The context batch pipelines run against.
pub type BatchContext = Context<BatchDoc, BatchServices>;

/// A batch lifecycle pipeline.
pub type BatchPipeline = Pipeline<BatchContext, BatchDoc>;

/// The evolving batch document.
///
/// Every field is plain data so the document can be stored as a database row
/// or JSON blob between ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchDoc {
    /// Local JSONL file the input records are appended to.
    pub input_path: PathBuf,
    /// Directory downloaded files are written to.
    pub output_dir: PathBuf,
    /// Endpoint every request line targets.
    pub endpoint: String,
    /// Lines appended so far.
    pub input_lines: u64,
    /// True once the source is exhausted.
    pub input_complete: bool,
    /// Uploaded input file.
    pub input_file_id: Option<String>,
    /// Remote job id.
    pub batch_id: Option<String>,
    /// Last known job status.
    pub status: Option<BatchStatus>,
    /// Last fetched job record.
    pub job: Option<BatchJob>,
    /// True once output file ids were captured.
    pub outputs_located: bool,
    /// Remote results file.
    pub output_file_id: Option<String>,
    /// Remote per-request errors file.
    pub error_file_id: Option<String>,
    /// True once the files are local.
    pub outputs_downloaded: bool,
    /// Local results file.
    pub output_path: Option<PathBuf>,
    /// Local errors file.
    pub error_path: Option<PathBuf>,
    /// Next unread byte of the results file.
    pub out_pos: u64,
    /// Partial line carried into the next slice.
    pub out_carry: String,
    /// Records dispatched.
    pub out_rows: u64,
    /// Unparsable output lines.
    pub out_skipped: u64,
    /// True once every record was dispatched.
    pub outputs_processed: bool,
}

impl BatchDoc {
    /// Creates a document for a new job.
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_dir: output_dir.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Returns true once every phase has finished.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.outputs_processed
    }

    /// Returns the base name used for downloaded files.
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.batch_id.clone().unwrap_or_else(|| {
            self.input_path
                .file_stem()
                .map_or_else(|| "batch".to_string(), |s| s.to_string_lossy().into_owned())
        })
    }

    /// Returns the local path for a downloaded file with `suffix`.
    #[must_use]
    pub fn download_path(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}{suffix}", self.file_stem()))
    }

    /// Returns the output processing cursor.
    #[must_use]
    pub fn output_cursor(&self) -> OutputCursor {
        OutputCursor {
            pos: self.out_pos,
            carry: self.out_carry.clone(),
            rows: self.out_rows,
            skipped: self.out_skipped,
        }
    }

    /// Folds a pause payload into the document.
    ///
    /// Payload keys use the document's field names; keys the document does
    /// not have (such as `retryAfterMs`) are ignored.
    pub fn absorb_pause(&self, pause: &Pause) -> Result<Self, serde_json::Error> {
        let Some(serde_json::Value::Object(payload)) = &pause.payload else {
            return Ok(self.clone());
        };
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(fields) = &mut value {
            for (key, field) in payload {
                fields.insert(key.clone(), field.clone());
            }
        }
        serde_json::from_value(value)
    }
}

/// Builds the seven-step batch lifecycle pipeline.
///
/// Remote calls retry and time out per the context policy. Step errors
/// pause the pipeline with reason `error`.
pub fn batch_pipeline(ctx: Arc<BatchContext>) -> BatchPipeline {
    Pipeline::with_shared_context("batch-lifecycle", ctx)
        .with_failure_mode(FailureMode::Pause)
        .add_step(BuildInput)
        .add_step(with_timeout(with_retry(UploadInput)))
        .add_step(with_timeout(with_retry(CreateBatch)))
        .add_step(with_timeout(with_retry(PollBatch)))
        .add_step(LocateOutputs)
        .add_step(with_timeout(with_retry(DownloadOutputs)))
        .add_step(ProcessOutputs)
}
