//! Tolerant parsing of model replies.
//!
//! Models wrap JSON in prose or code fences often enough that strict
//! parsing alone would fail a meaningful share of requests. Each
//! extractor tries progressively looser strategies and reports `None`
//! only when nothing usable is present; the calling stage supplies the
//! guaranteed fallback.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|sql)?\s*(.*?)```").unwrap());

/// Extract a JSON object from a model reply.
///
/// Strategies, in order: strict parse of the whole reply, parse of a
/// fenced code block, parse of the outermost `{...}` span, then a
/// line-by-line scan for the first line that parses as an object.
pub fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(captures) = CODE_FENCE.captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(captures[1].trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    for line in trimmed.lines() {
        let line = line.trim();
        if line.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Extract a single SELECT statement from a model reply.
///
/// Strips code fences and leading prose, then returns the text from the
/// first `SELECT` onward, with a trailing semicolon removed. Returns
/// `None` when no SELECT is present; the synthesizer treats that as a
/// validation failure, never as something to repair.
pub fn extract_select(reply: &str) -> Option<String> {
    let mut text = reply.trim().to_string();

    if let Some(captures) = CODE_FENCE.captures(&text) {
        text = captures[1].trim().to_string();
    }

    let upper = text.to_uppercase();
    let start = upper.find("SELECT")?;
    let statement = text[start..].trim().trim_end_matches(';').trim().to_string();

    if statement.is_empty() {
        None
    } else {
        Some(statement)
    }
}
