//! Repairs for model-produced JSON text.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\n?(.*?)\n?\s*```\s*$").expect("valid fence regex")
});

#[allow(clippy::expect_used)]
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"));

/// Removes a Markdown code fence wrapping the whole text.
#[must_use]
pub fn strip_fences(text: &str) -> &str {
    FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| text.trim(), |body| body.as_str().trim())
}

/// Removes commas directly before `}` or `]`.
///
/// This is textual: a string value containing `,}` is rewritten too.
#[must_use]
pub fn remove_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// Appends the closers a truncated document is missing.
///
/// Brackets inside strings are ignored. An unterminated string is closed
/// first. Text with a mismatched closer is returned unchanged.
#[must_use]
pub fn close_unbalanced(text: &str) -> String {
    let mut expected = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => expected.push('}'),
            '[' => expected.push(']'),
            '}' | ']' => {
                if expected.pop() != Some(ch) {
                    return text.to_string();
                }
            }
            _ => {}
        }
    }

    let mut repaired = text.trim_end().to_string();
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = expected.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Applies every repair: fences, then missing closers, then trailing commas.
#[must_use]
pub fn sanitize_json_text(text: &str) -> String {
    remove_trailing_commas(&close_unbalanced(strip_fences(text)))
}
