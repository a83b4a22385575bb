//! Semantic text chunking.
//!
//! The chunking pipeline cuts text into segments, embeds sliding windows of
//! neighbouring segments, and starts a new chunk wherever the distance
//! between consecutive windows is unusually large:
//!
//! 1. split into sentences (or Markdown blocks)
//! 2. return the input verbatim when there are too few segments
//! 3. build windows of `buffer_size` neighbours on each side
//! 4. embed the windows (retry and timeout per the context policy)
//! 5. measure cosine distances between consecutive windows
//! 6. take the `break_percentile` of the distances as the threshold
//! 7. walk the segments, cutting at the threshold or the size cap
//!
//! ```rust,ignore
//! let ctx = ChunkingContext::with_services(Chunker::new(embedder, ChunkingConfig::default()));
//! let chunks = semantic_chunk(Arc::new(ctx), text).await?;
//! ```

mod embed;
mod segment;
mod similarity;
mod steps;

pub use embed::{Embedder, FnEmbedder};
pub use segment::{build_windows, split_blocks, split_segments, split_sentences, SegmentMode};
pub use similarity::{consecutive_distances, cosine_distance, percentile};
pub use steps::{
    assemble_chunks, AssembleChunks, BuildWindows, EmbedWindows, GuardDegenerate,
    MeasureDistances, PickThreshold, SplitSegments,
};


use crate::combinators::{with_retry, with_timeout};
use crate::context::Context;
use crate::errors::{PipelineError, StepError};
use crate::pipeline::{FailureMode, Pipeline};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Chunking settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Neighbouring segments on each side included in a window.
    pub buffer_size: usize,
    /// Percentile of the distance distribution used as the break threshold.
    pub break_percentile: f64,
    /// Chunks shorter than this (in characters) are never cut, except the last.
    pub min_chunk_chars: usize,
    /// A chunk is cut before it would grow past this many characters.
    pub max_chunk_chars: usize,
    /// How the input is segmented.
    pub mode: SegmentMode,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1,
            break_percentile: 95.0,
            min_chunk_chars: 200,
            max_chunk_chars: 2000,
            mode: SegmentMode::Prose,
        }
    }
}

impl ChunkingConfig {
    /// Sets the window buffer.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the break percentile.
    #[must_use]
    pub fn with_break_percentile(mut self, percentile: f64) -> Self {
        self.break_percentile = percentile;
        self
    }

    /// Sets the chunk size bounds.
    #[must_use]
    pub fn with_chunk_chars(mut self, min: usize, max: usize) -> Self {
        self.min_chunk_chars = min;
        self.max_chunk_chars = max;
        self
    }

    /// Sets the segmentation mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SegmentMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Collaborators the chunking steps read from the context.
#[derive(Clone)]
pub struct Chunker {
    /// Embedding function.
    pub embedder: Arc<dyn Embedder>,
    /// Settings.
    pub config: ChunkingConfig,
}

impl Chunker {
    /// Creates the chunking services.
    pub fn new(embedder: Arc<dyn Embedder>, config: ChunkingConfig) -> Self {
        Self { embedder, config }
    }
}

impl fmt::Debug for Chunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The context chunking pipelines run against.
pub type ChunkingContext = Context<ChunkDoc, Chunker>;

/// The evolving chunking document.
///
/// Each step fills in one more field. Once `chunks` is set the remaining
/// steps pass the document through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDoc {
    /// The raw input.
    pub text: String,
    /// Sentences or blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<String>>,
    /// One window per segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<String>>,
    /// One embedding per window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,
    /// Distance between windows `i` and `i + 1`; `None` where undefined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distances: Option<Vec<Option<f64>>>,
    /// Break threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Final chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<String>>,
}

impl ChunkDoc {
    /// Creates a document from raw text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Returns true once chunks are decided.
    #[must_use]
    pub const fn is_chunked(&self) -> bool {
        self.chunks.is_some()
    }
}

/// Builds the seven-step chunking pipeline.
///
/// Step errors pause the pipeline rather than being skipped, so a missing
/// intermediate field never silently yields an empty result.
pub fn chunking_pipeline(ctx: Arc<ChunkingContext>) -> Pipeline<ChunkingContext, ChunkDoc> {
    Pipeline::with_shared_context("semantic-chunking", ctx)
        .with_failure_mode(FailureMode::Pause)
        .add_step(SplitSegments)
        .add_step(GuardDegenerate)
        .add_step(BuildWindows)
        .add_step(with_timeout(with_retry(EmbedWindows)))
        .add_step(MeasureDistances)
        .add_step(PickThreshold)
        .add_step(AssembleChunks)
}

/// Chunks `text` in one call.
///
/// Fails with [`PipelineError::Blocked`] if embedding paused (retries
/// exhausted or timed out).
pub async fn semantic_chunk(
    ctx: Arc<ChunkingContext>,
    text: impl Into<String>,
) -> Result<Vec<String>, PipelineError> {
    let pipeline = chunking_pipeline(ctx);
    let doc = pipeline
        .run_until_blocked(ChunkDoc::new(text), None)
        .await?
        .into_result()?;
    doc.chunks
        .ok_or_else(|| StepError::failed("chunking finished without chunks").into())
}
