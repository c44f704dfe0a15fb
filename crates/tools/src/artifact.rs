//! The closed set of artifact references a model may leave in its output.
//!
//! Artifact-generating tools (image/video generation) return ids that are
//! unknown until the tool runs, so the model refers to them with placeholder
//! tokens.  Every recognised token shape lives here — positional and
//! most-recent forms for same-turn chaining, plus the looser phrasings seen
//! in final suggested content.  The resolver substitutes by kind instead of
//! pattern-matching free text in multiple places.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Video,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Image, ArtifactKind::Video];

    /// Kind produced by a tool, when it is artifact-generating.
    pub fn for_tool(tool: &str) -> Option<Self> {
        match tool {
            "generate_image" => Some(Self::Image),
            "generate_video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Image => "generate_image",
            Self::Video => "generate_video",
        }
    }

    /// Canonical "most recent artifact of this kind" token.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Image => "GENERATED_IMAGE_ID",
            Self::Video => "GENERATED_VIDEO_ID",
        }
    }

    /// Token tied to the producing call's index within its turn.
    pub fn positional_token(&self, index: usize) -> String {
        format!("{}_{index}", self.token())
    }

    /// Pattern matching every recognised phrasing of a reference to this
    /// kind: the bare token, an optional positional suffix, `{{…}}`
    /// templating, and the descriptive "mediaId from the generate_image
    /// result" form models fall back to.
    pub fn reference_pattern(&self) -> Regex {
        let token = self.token();
        let tool = self.tool_name();
        let pattern = format!(
            r"(?i)\{{\{{\s*{token}(?:_\d+)?\s*\}}\}}|{token}(?:_\d+)?|(?:the\s+)?(?:media|asset)\s*[-_ ]?\s*id\s+from\s+(?:the\s+)?{tool}(?:\s+tool)?(?:\s+result|\s+output)?",
        );
        // Assembled from static parts only.
        Regex::new(&pattern).expect("artifact reference pattern is static")
    }
}

/// Artifact id carried in a tool result payload.
pub(crate) fn extract_artifact_id(result: &Value) -> Option<String> {
    for key in ["mediaId", "media_id", "assetId", "asset_id", "id"] {
        if let Some(id) = result.get(key).and_then(Value::as_str) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_name_round_trips_through_for_tool() {
        for kind in ArtifactKind::ALL {
            assert_eq!(ArtifactKind::for_tool(kind.tool_name()), Some(kind));
        }
        assert_eq!(ArtifactKind::for_tool("fetch_links"), None);
    }

    #[test]
    fn positional_token_shape() {
        assert_eq!(
            ArtifactKind::Image.positional_token(2),
            "GENERATED_IMAGE_ID_2"
        );
    }

    #[test]
    fn reference_pattern_matches_token_forms() {
        let re = ArtifactKind::Image.reference_pattern();
        assert!(re.is_match("GENERATED_IMAGE_ID"));
        assert!(re.is_match("generated_image_id"));
        assert!(re.is_match("GENERATED_IMAGE_ID_3"));
        assert!(re.is_match("{{GENERATED_IMAGE_ID}}"));
        assert!(re.is_match("{{ generated_image_id_1 }}"));
    }

    #[test]
    fn reference_pattern_matches_descriptive_phrasing() {
        let re = ArtifactKind::Image.reference_pattern();
        assert!(re.is_match("mediaId from generate_image result"));
        assert!(re.is_match("the media id from the generate_image tool result"));
        assert!(re.is_match("asset_id from generate_image output"));
    }

    #[test]
    fn reference_pattern_kind_isolation() {
        let image = ArtifactKind::Image.reference_pattern();
        assert!(!image.is_match("GENERATED_VIDEO_ID"));
        let video = ArtifactKind::Video.reference_pattern();
        assert!(video.is_match("GENERATED_VIDEO_ID_1"));
        assert!(!video.is_match("GENERATED_IMAGE_ID"));
    }

    #[test]
    fn extract_artifact_id_prefers_media_keys() {
        assert_eq!(
            extract_artifact_id(&json!({"mediaId": "m1", "id": "other"})),
            Some("m1".to_string())
        );
        assert_eq!(
            extract_artifact_id(&json!({"id": "a2"})),
            Some("a2".to_string())
        );
        assert_eq!(extract_artifact_id(&json!({"url": "https://…"})), None);
        assert_eq!(extract_artifact_id(&json!({"mediaId": ""})), None);
    }
}
