//! Permissive extraction of a JSON object from raw LLM output.
//!
//! Models wrap their JSON in markdown fences or chatty prose more often than
//! not. Extraction tries three strategies in order: direct parse, fenced
//! block, first balanced `{...}` substring. A bare top-level array or text
//! with no extractable object yields `None`, never a partial plan.

use serde_json::Value as JsonValue;

/// Pull the first JSON object out of free-form model text.
pub fn extract_json_object(text: &str) -> Option<JsonValue> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        return value.is_object().then_some(value);
    }
    if let Some(inner) = strip_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<JsonValue>(inner.trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    first_balanced_object(trimmed)
}

/// Strip a single leading/trailing markdown fence (```json or plain ```).
fn strip_fenced_block(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // drop the info string ("json", "JSON", ...) up to the first newline
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    let end = body.rfind("```")?;
    Some(&body[..end])
}

/// Scan for the first `{` that opens a balanced, parseable object. Later
/// candidates are tried when an earlier `{` turns out to be stray prose.
fn first_balanced_object(text: &str) -> Option<JsonValue> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(end) = balanced_end(bytes, open) {
            if let Ok(value) = serde_json::from_str::<JsonValue>(&text[open..=end]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
        start = open + 1;
    }
    None
}

/// Find the index of the `}` closing the object opened at `open`, honoring
/// string literals and escapes.
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
