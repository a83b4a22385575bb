//! Slice-at-a-time reading of a downloaded JSONL output file.

use super::sink::RecordSink;
use super::MIN_IO_SLICE_BYTES;
use crate::errors::StepError;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

/// Where output processing stands between slices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputCursor {
    /// Byte offset of the next unread byte.
    pub pos: u64,
    /// Text after the last newline read so far.
    pub carry: String,
    /// Records dispatched so far.
    pub rows: u64,
    /// Lines that were not valid JSON.
    pub skipped: u64,
}

/// Result of processing one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceReport {
    /// The cursor to resume from.
    pub cursor: OutputCursor,
    /// True once the whole file has been dispatched.
    pub at_eof: bool,
}

/// Reads at most `slice_bytes` from `path` at `cursor.pos` and dispatches
/// every complete line to `sink`.
///
/// The offset only advances past whole UTF-8 sequences, so the carry is
/// always valid text. At end of file the carry is dispatched as the last
/// line even without a trailing newline. Slices smaller than
/// [`MIN_IO_SLICE_BYTES`] are widened to it.
pub async fn process_slice(
    path: &Path,
    cursor: &OutputCursor,
    slice_bytes: usize,
    sink: &dyn RecordSink,
) -> Result<SliceReport, StepError> {
    let slice_bytes = slice_bytes.max(MIN_IO_SLICE_BYTES);
    let mut file = fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    file.seek(SeekFrom::Start(cursor.pos)).await?;

    let mut buf = Vec::with_capacity(slice_bytes);
    file.take(slice_bytes as u64).read_to_end(&mut buf).await?;
    let at_eof = cursor.pos + buf.len() as u64 >= len;

    let (text, consumed) = match std::str::from_utf8(&buf) {
        Ok(text) => (text.to_owned(), buf.len()),
        Err(err) if err.error_len().is_none() && !at_eof => {
            let valid = err.valid_up_to();
            (String::from_utf8_lossy(&buf[..valid]).into_owned(), valid)
        }
        Err(_) => (String::from_utf8_lossy(&buf).into_owned(), buf.len()),
    };

    let mut next = OutputCursor {
        pos: cursor.pos + consumed as u64,
        carry: String::new(),
        rows: cursor.rows,
        skipped: cursor.skipped,
    };

    let mut pending = cursor.carry.clone();
    pending.push_str(&text);

    let (complete, rest) = if at_eof {
        (pending.as_str(), "")
    } else {
        match pending.rfind('\n') {
            Some(idx) => (&pending[..idx], &pending[idx + 1..]),
            None => ("", pending.as_str()),
        }
    };

    for line in complete.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(record) => {
                sink.on_record(record, next.rows).await;
                next.rows += 1;
            }
            Err(err) => {
                warn!(offset = cursor.pos, error = %err, "skipping unparsable output line");
                next.skipped += 1;
            }
        }
    }
    next.carry = rest.to_string();

    debug!(
        path = %path.display(),
        pos = next.pos,
        rows = next.rows,
        at_eof,
        "processed output slice"
    );
    Ok(SliceReport {
        cursor: next,
        at_eof,
    })
}
