//! Tolerant extraction of a JSON object from free-form model output.
//!
//! Models wrap their answers in prose, code fences, or nothing at all.  The
//! parser never fails: when no JSON object can be recovered the raw text is
//! handed back as [`ParsedReply::Text`] and the turn loop treats that as the
//! final answer.

use serde_json::Value;

/// Outcome of parsing one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    /// A JSON object was recovered from the response.
    Json(Value),
    /// No parsable JSON — the raw text is the answer.
    Text(String),
}

impl ParsedReply {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

/// Parse a completion, preferring fenced JSON over bare objects.
pub fn parse_reply(raw: &str) -> ParsedReply {
    match extract_json_value(raw) {
        Some(value) => ParsedReply::Json(value),
        None => ParsedReply::Text(raw.to_string()),
    }
}

/// Extract the first JSON object from `raw`.
///
/// Strategy 1: a fenced block (```json or a bare ```) whose body contains a
/// `{…}` span.  Strategy 2: the first balanced top-level `{…}` span in the
/// raw text.  Returns `None` when neither yields valid JSON.
pub fn extract_json_value(raw: &str) -> Option<Value> {
    if let Some(value) = fenced_object(raw) {
        return Some(value);
    }
    balanced_object(raw)
}

/// Look for ```json (preferred) or a plain ``` fence and parse its body.
fn fenced_object(raw: &str) -> Option<Value> {
    for marker in ["```json", "```"] {
        let mut search_from = 0;
        while let Some(offset) = raw[search_from..].find(marker) {
            let fence_start = search_from + offset + marker.len();
            let body = &raw[fence_start..];
            // Skip the rest of the marker line (e.g. ```jsonc) and leading
            // whitespace before the payload.
            let body = body.trim_start_matches(|c: char| c != '\n').trim_start();
            if let Some(fence_end) = body.find("```") {
                let candidate = body[..fence_end].trim();
                if candidate.starts_with('{') {
                    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                        if value.is_object() {
                            return Some(value);
                        }
                    }
                    // Fence body may carry trailing prose; fall back to a
                    // balanced scan inside the fence.
                    if let Some(value) = balanced_object(candidate) {
                        return Some(value);
                    }
                }
            }
            search_from = fence_start;
        }
    }
    None
}

/// Scan for the first balanced `{…}` span that parses, respecting strings
/// and escapes.  Each `{` is a candidate start: a span that never closes or
/// fails to parse does not hide a later valid object.
fn balanced_object(raw: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(offset) = raw[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_close(&raw.as_bytes()[start..]) {
            let candidate = &raw[start..start + end + 1];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
        search_from = start + 1;
    }
    None
}

/// Index of the `}` balancing the `{` at `bytes[0]`, or `None`.
fn matching_close(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
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

// ── Tests ────────────────────────────────────────────────────────────────────
