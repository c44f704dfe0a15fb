//! Structural deep merge and dotted-path helpers.

use serde_json::{Map, Value};

use redraft_content::FieldMap;

/// Merge `b` over `a`.
///
/// Plain objects merge key-by-key recursively; everything else — arrays
/// included — is replaced wholesale by `b`.  A suggested array is the whole
/// array, never an element-wise patch.
pub fn deep_merge(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            let mut merged = left.clone();
            for (key, incoming) in right {
                let entry = match merged.get(key) {
                    Some(existing) => deep_merge(existing, incoming),
                    None => incoming.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        (_, replacement) => replacement.clone(),
    }
}

/// [`deep_merge`] specialised to top-level field maps.
pub fn merge_maps(a: &FieldMap, b: &FieldMap) -> FieldMap {
    match deep_merge(&Value::Object(a.clone()), &Value::Object(b.clone())) {
        Value::Object(merged) => merged,
        _ => unreachable!("merging two objects yields an object"),
    }
}

/// Set `value` at a dot-separated `path`, creating intermediate objects.
/// Non-object intermediates are replaced.
pub fn set_dotted(map: &mut FieldMap, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = map;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = slot
            .as_object_mut()
            .expect("slot was just ensured to be an object");
    }
}

/// Read the value at a dot-separated `path`.
pub fn get_dotted<'a>(map: &'a FieldMap, path: &str) -> Option<&'a Value> {
    let mut current: Option<&Value> = None;
    for segment in path.split('.') {
        current = match current {
            None => map.get(segment),
            Some(Value::Object(obj)) => obj.get(segment),
            _ => return None,
        };
        current?;
    }
    current
}

// ── Tests ────────────────────────────────────────────────────────────────────
