//! Pre-merge normalization of module props.
//!
//! Models return plain strings and `{id: …}` objects where the CMS stores a
//! structured rich-text document or a bare reference identifier.  Both are
//! fixed up here, immediately before merge, driven by the module schema.

use serde_json::{Value, json};
use tracing::debug;

use redraft_content::{FieldKind, FieldMap, ModuleSchema};

use crate::deep::{get_dotted, set_dotted};

/// Apply rich-text conversion and reference flattening to every annotated
/// field present in `props`.
pub fn normalize_props(schema: &ModuleSchema, props: &FieldMap) -> FieldMap {
    let mut normalized = props.clone();
    for (path, kind) in &schema.fields {
        let Some(value) = get_dotted(&normalized, path) else {
            continue;
        };
        match kind {
            FieldKind::Plain => {}
            FieldKind::Richtext => {
                if let Value::String(text) = value {
                    // Already-serialized structured content passes through.
                    let trimmed = text.trim_start();
                    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                        debug!(%path, "converting plain string to rich-text document");
                        let doc = markdown_to_doc(text);
                        set_dotted(&mut normalized, path, doc);
                    }
                }
            }
            FieldKind::Reference => {
                if let Value::Object(obj) = value {
                    if let Some(id) = obj.get("id") {
                        let flat = match id {
                            Value::String(s) => Some(Value::String(s.clone())),
                            Value::Number(n) => Some(Value::String(n.to_string())),
                            _ => None,
                        };
                        if let Some(flat) = flat {
                            set_dotted(&mut normalized, path, flat);
                        }
                    }
                }
            }
        }
    }
    normalized
}

/// Convert Markdown-looking plain text into the structured document shape.
///
/// Blocks are separated by blank lines; `#`-prefixed lines become headings.
/// A document-level heading (a level-1 heading as the very first block) is
/// skipped — the post's own title field carries it.
pub fn markdown_to_doc(text: &str) -> Value {
    let mut blocks: Vec<Value> = Vec::new();
    for (index, raw_block) in text.split("\n\n").enumerate() {
        let block = raw_block.trim();
        if block.is_empty() {
            continue;
        }
        if let Some(stripped) = block.strip_prefix('#') {
            let extra = stripped.chars().take_while(|c| *c == '#').count();
            let level = 1 + extra;
            let heading = stripped[extra..].trim();
            if index == 0 && level == 1 {
                continue;
            }
            blocks.push(json!({
                "type": "heading",
                "level": level,
                "content": [{"type": "text", "text": heading}],
            }));
        } else {
            let flowed = block
                .lines()
                .map(str::trim)
                .collect::<Vec<_>>()
                .join(" ");
            blocks.push(json!({
                "type": "paragraph",
                "content": [{"type": "text", "text": flowed}],
            }));
        }
    }
    json!({"type": "doc", "content": blocks})
}

// ── Tests ────────────────────────────────────────────────────────────────────
