//! Text and timestamp helpers shared by the router, exports, and history
//! rendering.

use chrono::{SecondsFormat, Utc};
use regex::Regex;

/// RFC3339 UTC timestamp with millisecond precision (storage format).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Collapse internal whitespace runs to single spaces and trim.
pub fn normalize_single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a long message into chat-sized chunks, preferring blank-line and
/// line-break boundaries over hard cuts.
pub fn split_chat_message(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut remaining = text;

    while remaining.len() > max {
        let slice = &remaining[..floor_char_boundary(remaining, max)];
        let last_break = slice
            .rfind("\n\n")
            .or_else(|| slice.rfind('\n'))
            .unwrap_or(0);
        let split_at = if last_break > 500 { last_break } else { slice.len() };

        parts.push(remaining[..split_at].trim().to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        parts.push(remaining.trim().to_string());
    }

    parts
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Strip Markdown artifacts the cleanup model sometimes emits despite the
/// plain-text instruction (fences, headings, emphasis, links).
pub fn strip_markdown_artifacts(text: &str) -> String {
    let fences = Regex::new(r"```").expect("valid regex");
    let headings = Regex::new(r"(?m)^#{1,6}\s*").expect("valid regex");
    let bold = Regex::new(r"\*\*(.*?)\*\*").expect("valid regex");
    let underline = Regex::new(r"__(.*?)__").expect("valid regex");
    let inline_code = Regex::new(r"`([^`]+)`").expect("valid regex");
    let links = Regex::new(r"\[(.*?)\]\((.*?)\)").expect("valid regex");
    let blank_runs = Regex::new(r"\n{3,}").expect("valid regex");

    let mut out = fences.replace_all(text, "").into_owned();
    out = headings.replace_all(&out, "").into_owned();
    out = bold.replace_all(&out, "$1").into_owned();
    out = underline.replace_all(&out, "$1").into_owned();
    out = inline_code.replace_all(&out, "$1").into_owned();
    out = links.replace_all(&out, "$1 ($2)").into_owned();
    out = blank_runs.replace_all(&out, "\n\n").into_owned();
    out.trim().to_string()
}

/// Whether the cleaned text adds anything over the raw text.
///
/// Skips the cleaned block when it is empty, identical modulo whitespace,
/// or a near-verbatim echo of a short note.
pub fn cleaned_text_differs(raw_text: &str, cleaned_text: &str) -> bool {
    let normalize = |s: &str| normalize_single_line(s).to_lowercase();

    let cleaned_norm = normalize(cleaned_text);
    if cleaned_norm.is_empty() || cleaned_norm == normalize(raw_text) {
        return false;
    }

    true
}
