//! The terminal output of a turn loop: proposed post/module changes.
//!
//! Suggestions are sparse — a field absent from the suggestion means "no
//! change", never "set to null".  The shape is a closed struct (built once
//! at the parser boundary) rather than an open map, so metadata like the
//! summary or a redirect id can never bleed into post fields.

use serde::{Deserialize, Serialize};

use crate::FieldMap;

/// Proposed changes to one module type (or one instance of it).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleUpdate {
    /// Module type the update targets.
    #[serde(rename = "type", alias = "module", alias = "moduleType")]
    pub module_type: String,
    /// Position among instances of the type.  `None` fans the update out to
    /// every instance of the type on the post.
    #[serde(rename = "orderIndex", alias = "index", alias = "position")]
    pub order_index: Option<usize>,
    pub props: FieldMap,
    pub overrides: FieldMap,
}

impl ModuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.overrides.is_empty()
    }
}

/// The full parsed suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestedContent {
    /// Sparse post-field changes.
    pub post: Option<FieldMap>,
    pub modules: Vec<ModuleUpdate>,
    /// Set when the agent's work produced a different post (translation,
    /// clone) that the caller should navigate to instead.
    #[serde(rename = "redirectPostId")]
    pub redirect_post_id: Option<String>,
}

impl SuggestedContent {
    pub fn is_empty(&self) -> bool {
        self.post.as_ref().map_or(true, |p| p.is_empty())
            && self.modules.iter().all(ModuleUpdate::is_empty)
    }

    /// Count of changed post fields (for summary synthesis).
    pub fn changed_field_count(&self) -> usize {
        self.post.as_ref().map_or(0, |p| p.len())
    }

    pub fn changed_module_count(&self) -> usize {
        self.modules.iter().filter(|m| !m.is_empty()).count()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
