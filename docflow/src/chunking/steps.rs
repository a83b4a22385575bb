//! The chunking steps.

use super::segment::{build_windows, split_segments};
use super::similarity::{consecutive_distances, percentile};
use super::{ChunkDoc, ChunkingContext};
use crate::core::{Outcome, StepResult};
use crate::errors::StepError;
use crate::steps::Step;
use async_trait::async_trait;
use tracing::{debug, warn};

fn pass(doc: &ChunkDoc) -> StepResult<ChunkDoc> {
    Ok(Outcome::Progress(doc.clone()))
}

fn missing(field: &str) -> StepError {
    StepError::failed(format!("chunk document has no {field}"))
}

/// Splits the input into segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitSegments;

#[async_trait]
impl Step<ChunkingContext, ChunkDoc> for SplitSegments {
    fn name(&self) -> &str {
        "split-segments"
    }

    async fn run(&self, ctx: &ChunkingContext, doc: &ChunkDoc) -> StepResult<ChunkDoc> {
        if doc.is_chunked() {
            return pass(doc);
        }
        let segments = split_segments(&doc.text, ctx.services().config.mode);
        debug!(segments = segments.len(), "split input");
        Ok(Outcome::Progress(ChunkDoc {
            segments: Some(segments),
            ..doc.clone()
        }))
    }
}

/// Returns the input verbatim as the only chunk when there are too few
/// segments to compare.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardDegenerate;

#[async_trait]
impl Step<ChunkingContext, ChunkDoc> for GuardDegenerate {
    fn name(&self) -> &str {
        "guard-degenerate"
    }

    async fn run(&self, ctx: &ChunkingContext, doc: &ChunkDoc) -> StepResult<ChunkDoc> {
        if doc.is_chunked() {
            return pass(doc);
        }
        let count = doc.segments.as_ref().map_or(0, Vec::len);
        if count > ctx.services().config.buffer_size {
            return pass(doc);
        }
        debug!(segments = count, "too few segments; returning input as one chunk");
        Ok(Outcome::Progress(ChunkDoc {
            chunks: Some(vec![doc.text.clone()]),
            ..doc.clone()
        }))
    }
}

/// Builds a window around every segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildWindows;

#[async_trait]
impl Step<ChunkingContext, ChunkDoc> for BuildWindows {
    fn name(&self) -> &str {
        "build-windows"
    }

    async fn run(&self, ctx: &ChunkingContext, doc: &ChunkDoc) -> StepResult<ChunkDoc> {
        if doc.is_chunked() {
            return pass(doc);
        }
        let segments = doc.segments.as_ref().ok_or_else(|| missing("segments"))?;
        let windows = build_windows(segments, ctx.services().config.buffer_size);
        Ok(Outcome::Progress(ChunkDoc {
            windows: Some(windows),
            ..doc.clone()
        }))
    }
}

/// Embeds every window with the context's embedder.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedWindows;

#[async_trait]
impl Step<ChunkingContext, ChunkDoc> for EmbedWindows {
    fn name(&self) -> &str {
        "embed-windows"
    }

    async fn run(&self, ctx: &ChunkingContext, doc: &ChunkDoc) -> StepResult<ChunkDoc> {
        if doc.is_chunked() || doc.embeddings.is_some() {
            return pass(doc);
        }
        let windows = doc.windows.as_ref().ok_or_else(|| missing("windows"))?;
        let embeddings = ctx.services().embedder.embed(windows).await?;
        if embeddings.len() != windows.len() {
            return Err(StepError::failed(format!(
                "embedder returned {} vectors for {} windows",
                embeddings.len(),
                windows.len()
            )));
        }
        Ok(Outcome::Progress(ChunkDoc {
            embeddings: Some(embeddings),
            ..doc.clone()
        }))
    }
}

/// Measures the cosine distance between consecutive windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasureDistances;

#[async_trait]
impl Step<ChunkingContext, ChunkDoc> for MeasureDistances {
    fn name(&self) -> &str {
        "measure-distances"
    }

    async fn run(&self, _ctx: &ChunkingContext, doc: &ChunkDoc) -> StepResult<ChunkDoc> {
        if doc.is_chunked() {
            return pass(doc);
        }
        let embeddings = doc.embeddings.as_ref().ok_or_else(|| missing("embeddings"))?;
        Ok(Outcome::Progress(ChunkDoc {
            distances: Some(consecutive_distances(embeddings)),
            ..doc.clone()
        }))
    }
}

/// Picks the break threshold, or settles on a single chunk when no threshold
/// can be computed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickThreshold;

#[async_trait]
impl Step<ChunkingContext, ChunkDoc> for PickThreshold {
    fn name(&self) -> &str {
        "pick-threshold"
    }

    async fn run(&self, ctx: &ChunkingContext, doc: &ChunkDoc) -> StepResult<ChunkDoc> {
        if doc.is_chunked() {
            return pass(doc);
        }
        let distances = doc.distances.as_ref().ok_or_else(|| missing("distances"))?;
        let valid: Vec<f64> = distances.iter().flatten().copied().collect();
        let threshold = percentile(&valid, ctx.services().config.break_percentile)
            .filter(|t| t.is_finite());

        let Some(threshold) = threshold else {
            warn!(
                distances = distances.len(),
                valid = valid.len(),
                "no usable distance threshold; returning a single chunk"
            );
            let segments = doc.segments.as_deref().unwrap_or_default();
            return Ok(Outcome::Progress(ChunkDoc {
                chunks: Some(vec![segments.join(" ")]),
                ..doc.clone()
            }));
        };

        debug!(threshold, "picked break threshold");
        Ok(Outcome::Progress(ChunkDoc {
            threshold: Some(threshold),
            ..doc.clone()
        }))
    }
}

/// Walks the segments and cuts them into chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleChunks;

#[async_trait]
impl Step<ChunkingContext, ChunkDoc> for AssembleChunks {
    fn name(&self) -> &str {
        "assemble-chunks"
    }

    async fn run(&self, ctx: &ChunkingContext, doc: &ChunkDoc) -> StepResult<ChunkDoc> {
        if doc.is_chunked() {
            return pass(doc);
        }
        let segments = doc.segments.as_ref().ok_or_else(|| missing("segments"))?;
        let distances = doc.distances.as_ref().ok_or_else(|| missing("distances"))?;
        let threshold = doc.threshold.ok_or_else(|| missing("threshold"))?;
        let config = &ctx.services().config;

        let chunks = assemble_chunks(
            segments,
            distances,
            threshold,
            config.min_chunk_chars,
            config.max_chunk_chars,
        );
        debug!(chunks = chunks.len(), "assembled chunks");
        Ok(Outcome::Progress(ChunkDoc {
            chunks: Some(chunks),
            ..doc.clone()
        }))
    }
}

/// Groups segments into chunks.
///
/// After segment `i`, the current chunk is closed when it has at least
/// `min_chars` characters and either `distances[i] >= threshold` or adding
/// the next segment would exceed `max_chars`. Only the last chunk can end up
/// below `min_chars`; the minimum wins when the two bounds conflict.
#[must_use]
pub fn assemble_chunks(
    segments: &[String],
    distances: &[Option<f64>],
    threshold: f64,
    min_chars: usize,
    max_chars: usize,
) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for (i, segment) in segments.iter().enumerate() {
        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(segment);
        current_chars += segment.chars().count();

        let Some(next) = segments.get(i + 1) else {
            break;
        };
        if current_chars < min_chars {
            continue;
        }
        let semantic_break = distances
            .get(i)
            .copied()
            .flatten()
            .is_some_and(|d| d >= threshold);
        let too_large = current_chars + 1 + next.chars().count() > max_chars;
        if semantic_break || too_large {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
