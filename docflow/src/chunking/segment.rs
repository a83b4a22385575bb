//! Splitting raw text into atomic segments and sliding windows.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence pattern is valid"));

/// How input text is cut into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMode {
    /// Sentences, ending at `.`, `!` or `?` followed by whitespace.
    #[default]
    Prose,
    /// Blocks separated by blank lines; fenced code blocks stay whole.
    Markdown,
}

/// Splits `text` into trimmed, non-empty segments.
#[must_use]
pub fn split_segments(text: &str, mode: SegmentMode) -> Vec<String> {
    match mode {
        SegmentMode::Prose => split_sentences(text),
        SegmentMode::Markdown => split_blocks(text),
    }
}

/// Splits prose after sentence-ending punctuation.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut start = 0;
    for found in SENTENCE_END.find_iter(text) {
        let punctuation = found.as_str().trim_end().len();
        push_trimmed(&mut segments, &text[start..found.start() + punctuation]);
        start = found.end();
    }
    push_trimmed(&mut segments, &text[start..]);
    segments
}

/// Splits Markdown on blank lines, keeping fenced code blocks in one piece.
#[must_use]
pub fn split_blocks(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match fence {
            Some(marker) => {
                block.push(line);
                if closes_fence(trimmed, marker) {
                    fence = None;
                }
            }
            None if fence_run(trimmed).is_some() => {
                fence = fence_run(trimmed);
                block.push(line);
            }
            None if trimmed.is_empty() => {
                push_trimmed(&mut segments, &block.join("\n"));
                block.clear();
            }
            None => block.push(line),
        }
    }
    push_trimmed(&mut segments, &block.join("\n"));
    segments
}

/// Returns the leading run of three or more backticks or tildes.
fn fence_run(line: &str) -> Option<&str> {
    let mark = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = line.len() - line.trim_start_matches(mark).len();
    (len >= 3).then(|| &line[..len])
}

/// A closing fence repeats the opener's character at least as many times
/// and carries no info string.
fn closes_fence(line: &str, opener: &str) -> bool {
    fence_run(line).is_some_and(|run| {
        run.len() >= opener.len()
            && run.as_bytes()[0] == opener.as_bytes()[0]
            && line[run.len()..].trim().is_empty()
    })
}

fn push_trimmed(segments: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        segments.push(piece.to_string());
    }
}

/// Builds one window per segment: the segment plus `buffer` neighbours on
/// each side, joined with a space.
#[must_use]
pub fn build_windows(segments: &[String], buffer: usize) -> Vec<String> {
    let last = segments.len().saturating_sub(1);
    (0..segments.len())
        .map(|i| {
            let lo = i.saturating_sub(buffer);
            let hi = (i + buffer).min(last);
            segments[lo..=hi].join(" ")
        })
        .collect()
}
