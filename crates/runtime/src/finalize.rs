//! Turning the loop's terminal text into a typed suggestion.
//!
//! Models are sloppy about the final shape: the JSON may be fenced, the
//! post fields may arrive without a `post` wrapper, or the whole answer may
//! be double-encoded inside a `content` string.  All of that is repaired
//! here, once, so everything downstream works with a closed struct.

use serde_json::{Map, Value};
use tracing::debug;

use redraft_content::SuggestedContent;
use redraft_llm::extract_json_value;

/// Keys that identify a bare post object returned without a wrapper.
const POST_FIELD_KEYS: &[&str] = &["title", "slug", "excerpt", "body", "description", "seo"];

/// Metadata keys that must never land in post fields.
const META_KEYS: &[&str] = &["summary", "determination", "reasoning", "redirectPostId"];

#[derive(Debug, Clone)]
pub struct FinalizedReply {
    pub suggestion: SuggestedContent,
    /// Always present: extracted from the reply or synthesized.
    pub summary: String,
    /// Model's self-reported reasoning, captured only in debug mode.
    pub determination: Option<String>,
}

/// Parse the terminal completion text into a [`FinalizedReply`].
pub fn finalize_reply(raw: &str, debug_mode: bool) -> FinalizedReply {
    let mut value = match extract_json_value(raw) {
        Some(value) => value,
        // Non-JSON terminal text becomes the content itself.
        None => {
            let mut wrapper = Map::new();
            wrapper.insert("content".to_string(), Value::String(raw.to_string()));
            Value::Object(wrapper)
        }
    };

    unwrap_content_string(&mut value);

    let mut object = match value {
        Value::Object(map) => map,
        // A non-object at this point can only come from `unwrap_content_string`
        // refusing, which keeps objects; defensive empty fallback.
        _ => Map::new(),
    };

    // Pull metadata out before any shape repair.
    let summary = take_string(&mut object, "summary");
    let determination = if debug_mode {
        take_string(&mut object, "determination").or_else(|| take_string(&mut object, "reasoning"))
    } else {
        object.remove("determination");
        object.remove("reasoning");
        None
    };

    wrap_bare_post(&mut object);

    let suggestion: SuggestedContent =
        serde_json::from_value(Value::Object(object)).unwrap_or_default();

    let summary = summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| synthesize_summary(raw, &suggestion));

    FinalizedReply {
        suggestion,
        summary,
        determination,
    }
}

/// Undo a double-encoded answer: the whole reply wrapped in a `content`
/// JSON string.  Only fires when the string itself parses as a JSON object,
/// so a reply that legitimately wants a literal `content` field survives.
fn unwrap_content_string(value: &mut Value) {
    let Some(object) = value.as_object() else {
        return;
    };
    let Some(Value::String(inner_raw)) = object.get("content") else {
        return;
    };
    let Ok(inner @ Value::Object(_)) = serde_json::from_str::<Value>(inner_raw) else {
        return;
    };
    debug!("unwrapping content-string reply one level");
    let mut merged = inner;
    // Metadata sitting next to `content` (e.g. a summary) is preserved.
    if let (Value::Object(inner_map), Some(outer)) = (&mut merged, value.as_object()) {
        for key in META_KEYS {
            if let Some(meta) = outer.get(*key) {
                inner_map.entry(key.to_string()).or_insert_with(|| meta.clone());
            }
        }
    }
    *value = merged;
}

/// Wrap a bare content object (`{"title": …}`) under `post` when the model
/// forgot the wrapper.
fn wrap_bare_post(object: &mut Map<String, Value>) {
    if object.contains_key("post") || object.contains_key("modules") {
        return;
    }
    let looks_like_post = object.keys().any(|k| POST_FIELD_KEYS.contains(&k.as_str()));
    if !looks_like_post {
        return;
    }
    debug!("wrapping bare content object under post");
    let fields: Map<String, Value> = std::mem::take(object);
    object.insert("post".to_string(), Value::Object(fields));
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    // Non-string values are removed but not surfaced.
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Heuristic summary when the model didn't provide one: prefer free text
/// preceding the first fence/JSON marker, else a terse count sentence.
fn synthesize_summary(raw: &str, suggestion: &SuggestedContent) -> String {
    let marker = raw
        .find("```")
        .into_iter()
        .chain(raw.find('{'))
        .min()
        .unwrap_or(raw.len());
    let leading = raw[..marker].trim();
    if !leading.is_empty() {
        return leading.to_string();
    }

    let fields = suggestion.changed_field_count();
    let modules = suggestion.changed_module_count();
    if fields == 0 && modules == 0 {
        "No content changes suggested.".to_string()
    } else {
        format!("Suggested changes to {fields} post field(s) and {modules} module(s).")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_with_post_wrapper() {
        let reply = finalize_reply(r#"{"post":{"title":"X"},"summary":"Retitled."}"#, false);
        let post = reply.suggestion.post.unwrap();
        assert_eq!(post["title"], "X");
        assert_eq!(reply.summary, "Retitled.");
    }

    #[test]
    fn non_json_text_terminates_with_empty_suggestion() {
        let reply = finalize_reply("I couldn't find anything to change.", false);
        // `content` is not a post-field key, so no post wrapper appears and
        // the suggestion stays empty; the prose doubles as the summary.
        assert!(reply.suggestion.is_empty());
        assert_eq!(reply.summary, "I couldn't find anything to change.");
    }

    #[test]
    fn bare_post_object_is_wrapped() {
        let reply = finalize_reply(r#"{"title":"New","excerpt":"Short."}"#, false);
        let post = reply.suggestion.post.unwrap();
        assert_eq!(post["title"], "New");
        assert_eq!(post["excerpt"], "Short.");
    }

    #[test]
    fn bare_post_wrap_excludes_metadata() {
        let reply = finalize_reply(r#"{"title":"New","summary":"Did it."}"#, false);
        let post = reply.suggestion.post.unwrap();
        assert!(post.get("summary").is_none());
        assert_eq!(reply.summary, "Did it.");
    }

    #[test]
    fn double_encoded_content_is_unwrapped_once() {
        let raw = json!({
            "content": "{\"post\":{\"title\":\"Inner\"}}",
            "summary": "From outside"
        })
        .to_string();
        let reply = finalize_reply(&raw, false);
        assert_eq!(reply.suggestion.post.unwrap()["title"], "Inner");
        assert_eq!(reply.summary, "From outside");
    }

    #[test]
    fn literal_prose_content_field_is_not_unwrapped() {
        let raw = json!({
            "post": {"content": "just an ordinary paragraph"},
        })
        .to_string();
        let reply = finalize_reply(&raw, false);
        assert_eq!(
            reply.suggestion.post.unwrap()["content"],
            "just an ordinary paragraph"
        );
    }

    #[test]
    fn summary_synthesized_from_leading_text() {
        let reply = finalize_reply(
            "Here's a tighter headline.\n```json\n{\"post\":{\"title\":\"T\"}}\n```",
            false,
        );
        assert_eq!(reply.summary, "Here's a tighter headline.");
    }

    #[test]
    fn summary_synthesized_from_counts() {
        let reply = finalize_reply(
            r#"{"post":{"title":"T"},"modules":[{"type":"hero","props":{"h":"x"}}]}"#,
            false,
        );
        assert_eq!(
            reply.summary,
            "Suggested changes to 1 post field(s) and 1 module(s)."
        );
    }

    #[test]
    fn determination_kept_only_in_debug_mode() {
        let raw = r#"{"post":{"title":"T"},"determination":"because reasons"}"#;

        let plain = finalize_reply(raw, false);
        assert!(plain.determination.is_none());
        assert!(plain.suggestion.post.unwrap().get("determination").is_none());

        let debugged = finalize_reply(raw, true);
        assert_eq!(debugged.determination.as_deref(), Some("because reasons"));
    }

    #[test]
    fn redirect_post_id_lands_in_typed_field() {
        let reply = finalize_reply(r#"{"redirectPostId":"p42"}"#, false);
        assert_eq!(reply.suggestion.redirect_post_id.as_deref(), Some("p42"));
    }

    #[test]
    fn modules_parse_with_aliases() {
        let raw = r#"{"modules":[{"module":"hero","position":2,"props":{"headline":"H"}}]}"#;
        let reply = finalize_reply(raw, false);
        assert_eq!(reply.suggestion.modules.len(), 1);
        assert_eq!(reply.suggestion.modules[0].module_type, "hero");
        assert_eq!(reply.suggestion.modules[0].order_index, Some(2));
    }
}
