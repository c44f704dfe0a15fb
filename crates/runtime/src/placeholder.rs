//! Placeholder resolution for asynchronously generated artifacts.
//!
//! The model refers to artifacts that don't exist yet (a media id only known
//! once `generate_image` runs) with tokens from the closed set defined by
//! [`ArtifactKind`].  Resolution happens twice: before each tool call within
//! a turn (so a later call can chain on an earlier call's artifact), and in
//! one final pass over the suggested content, where an unresolvable
//! placeholder deletes its containing field instead of leaking into a draft.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use redraft_content::SuggestedContent;
use redraft_tools::{ArtifactKind, ToolExecution};

pub struct PlaceholderResolver {
    patterns: Vec<(ArtifactKind, Regex)>,
}

impl PlaceholderResolver {
    pub fn new() -> Self {
        Self {
            patterns: ArtifactKind::ALL
                .iter()
                .map(|kind| (*kind, kind.reference_pattern()))
                .collect(),
        }
    }

    // ── intra-turn substitution ──────────────────────────────────────────

    /// Substitute known tokens in `params` using artifacts produced earlier
    /// in the *same turn*.  Both the positional token (tied to the producing
    /// call's index) and the generic most-recent token are recognised.
    pub fn resolve_params(&self, params: &mut Value, turn_executions: &[ToolExecution]) {
        let mut tokens: Vec<(String, String)> = Vec::new();
        let mut latest: HashMap<ArtifactKind, String> = HashMap::new();
        for (index, execution) in turn_executions.iter().enumerate() {
            if let Some((kind, id)) = execution.artifact_id() {
                tokens.push((kind.positional_token(index), id.clone()));
                latest.insert(kind, id);
            }
        }
        for (kind, id) in latest {
            tokens.push((kind.token().to_string(), id));
        }
        if tokens.is_empty() {
            return;
        }
        // Positional tokens first: GENERATED_IMAGE_ID is a prefix of
        // GENERATED_IMAGE_ID_2.
        tokens.sort_by_key(|(token, _)| std::cmp::Reverse(token.len()));
        substitute_tokens(params, &tokens);
    }

    // ── final content pass ───────────────────────────────────────────────

    /// Resolve or remove every placeholder left in the final suggestion.
    ///
    /// A matching string becomes the generated id when generation succeeded;
    /// otherwise its containing field is deleted — array items are removed
    /// and object keys dropped, never left as a dangling `null`.
    pub fn scrub_suggestion(
        &self,
        suggestion: &mut SuggestedContent,
        session_executions: &[ToolExecution],
    ) {
        let mut latest: HashMap<ArtifactKind, String> = HashMap::new();
        for execution in session_executions {
            if let Some((kind, id)) = execution.artifact_id() {
                latest.insert(kind, id);
            }
        }
        let resolutions: Vec<(&Regex, Option<&String>)> = self
            .patterns
            .iter()
            .map(|(kind, pattern)| (pattern, latest.get(kind)))
            .collect();

        if let Some(post) = &mut suggestion.post {
            let mut value = Value::Object(std::mem::take(post));
            scrub_value(&mut value, &resolutions);
            if let Value::Object(map) = value {
                *post = map;
            }
        }
        for update in &mut suggestion.modules {
            for map in [&mut update.props, &mut update.overrides] {
                let mut value = Value::Object(std::mem::take(map));
                scrub_value(&mut value, &resolutions);
                if let Value::Object(cleaned) = value {
                    *map = cleaned;
                }
            }
        }
    }
}

impl Default for PlaceholderResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the parameter tree and replace token occurrences in strings.
fn substitute_tokens(value: &mut Value, tokens: &[(String, String)]) {
    match value {
        Value::String(text) => {
            for (token, id) in tokens {
                if is_whole_token(text, token) {
                    *text = id.clone();
                    break;
                }
                if text.to_ascii_uppercase().contains(token.as_str()) {
                    *text = replace_ignore_case(text, token, id);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_tokens(item, tokens);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_tokens(item, tokens);
            }
        }
        _ => {}
    }
}

/// `true` when `text` is nothing but the token, optionally `{{…}}`-wrapped.
fn is_whole_token(text: &str, token: &str) -> bool {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed);
    inner.eq_ignore_ascii_case(token)
}

fn replace_ignore_case(text: &str, token: &str, id: &str) -> String {
    let upper = text.to_ascii_uppercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(offset) = upper[cursor..].find(token) {
        let start = cursor + offset;
        out.push_str(&text[cursor..start]);
        out.push_str(id);
        cursor = start + token.len();
    }
    out.push_str(&text[cursor..]);
    out
}

/// Returns `true` when the containing field must be removed.
fn scrub_value(value: &mut Value, resolutions: &[(&Regex, Option<&String>)]) -> bool {
    match value {
        Value::String(text) => {
            for (pattern, id) in resolutions {
                if let Some(found) = pattern.find(text) {
                    match id {
                        Some(id) => {
                            if found.start() == 0 && found.end() == text.trim_end().len() {
                                *text = (*id).clone();
                            } else {
                                *text = pattern.replace_all(text, id.as_str()).into_owned();
                            }
                            debug!("resolved placeholder in suggested content");
                        }
                        None => {
                            debug!("dropping field with unresolved placeholder");
                            return true;
                        }
                    }
                }
            }
            false
        }
        Value::Array(items) => {
            items.retain_mut(|item| !scrub_value(item, resolutions));
            false
        }
        Value::Object(map) => {
            map.retain(|_, item| !scrub_value(item, resolutions));
            false
        }
        _ => false,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
