//! Content data model shared by the merge engine and the execution runtime.
//!
//! A post is a flat field map plus an ordered list of module instances.  On
//! top of the live/approved content sit two sparse draft tiers (`review` and
//! `ai-review`); each tier holds post-field overrides and per-module
//! prop/field-override maps, and carries a revision counter used for
//! optimistic concurrency at write time.

mod store;
mod suggestion;

pub use store::{ContentStore, MemoryContentStore, RevisionRecord, StoreError};
pub use suggestion::{ModuleUpdate, SuggestedContent};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type FieldMap = Map<String, Value>;

// ── Draft tiers ──────────────────────────────────────────────────────────────

/// The three layered content states of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DraftTier {
    /// Live/approved content — what the site renders.
    #[serde(rename = "source")]
    Source,
    /// Human review drafts.
    #[serde(rename = "review")]
    Review,
    /// Agent-suggested drafts awaiting human review.
    #[serde(rename = "ai-review")]
    AiReview,
}

impl DraftTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Review => "review",
            Self::AiReview => "ai-review",
        }
    }

    /// Storage column the tier maps to.  Surfaced in persistence errors so a
    /// failing write can be diagnosed without exposing row contents.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Source => "content",
            Self::Review => "review_draft",
            Self::AiReview => "ai_draft",
        }
    }
}

// ── Module schema ────────────────────────────────────────────────────────────

/// How a module field should be treated during merge normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Plain,
    /// Structured rich-text document; plain strings are converted on merge.
    Richtext,
    /// Reference stored by identifier; `{id: v}` objects are flattened.
    Reference,
}

/// Field-kind annotations for one module type.  Keys are dotted paths
/// relative to the module's props (`"body"`, `"cta.label"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSchema {
    pub fields: BTreeMap<String, FieldKind>,
}

impl ModuleSchema {
    /// Look up the kind for a dotted path, falling back to the first path
    /// segment so `cta.label` inherits an annotation on `cta`.
    pub fn kind_of(&self, path: &str) -> FieldKind {
        if let Some(kind) = self.fields.get(path) {
            return *kind;
        }
        if let Some((head, _)) = path.split_once('.') {
            if let Some(kind) = self.fields.get(head) {
                return *kind;
            }
        }
        FieldKind::Plain
    }
}

// ── Modules ──────────────────────────────────────────────────────────────────

/// One placed module on a post.  `order_index` is the position among all
/// modules of the same type, not the absolute position on the post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(rename = "orderIndex")]
    pub order_index: usize,
    #[serde(default)]
    pub props: FieldMap,
    #[serde(default)]
    pub schema: ModuleSchema,
}

// ── Tier drafts ──────────────────────────────────────────────────────────────

/// Sparse override set for one draft tier.  Module maps are keyed by module
/// instance id.  Never written partially: a merge either replaces the whole
/// draft or leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierDraft {
    pub post: FieldMap,
    pub module_props: BTreeMap<String, FieldMap>,
    pub module_overrides: BTreeMap<String, FieldMap>,
    /// Monotonic per-tier revision, checked at write time.
    pub revision: u64,
}

impl TierDraft {
    pub fn is_empty(&self) -> bool {
        self.post.is_empty() && self.module_props.is_empty() && self.module_overrides.is_empty()
    }
}

// ── Post snapshot ────────────────────────────────────────────────────────────

/// Canonical in-memory view of a post: live content plus both draft tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub id: String,
    /// Live/approved post fields (title, slug, excerpt, body, …).
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub modules: Vec<ModuleInstance>,
    #[serde(default)]
    pub review: TierDraft,
    #[serde(default, rename = "aiReview")]
    pub ai_review: TierDraft,
    /// Revision of the live content itself (used when a field-scoped edit
    /// writes straight into the source tier).
    #[serde(default)]
    pub revision: u64,
}

impl PostSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: FieldMap::new(),
            modules: Vec::new(),
            review: TierDraft::default(),
            ai_review: TierDraft::default(),
            revision: 0,
        }
    }

    pub fn module_by_id(&self, id: &str) -> Option<&ModuleInstance> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Instances of one type in ascending `order_index`.
    pub fn modules_of_type(&self, module_type: &str) -> Vec<&ModuleInstance> {
        let mut found: Vec<&ModuleInstance> = self
            .modules
            .iter()
            .filter(|m| m.module_type == module_type)
            .collect();
        found.sort_by_key(|m| m.order_index);
        found
    }

    pub fn draft(&self, tier: DraftTier) -> Option<&TierDraft> {
        match tier {
            DraftTier::Source => None,
            DraftTier::Review => Some(&self.review),
            DraftTier::AiReview => Some(&self.ai_review),
        }
    }

    /// Revision the caller must present to write `tier`.
    pub fn tier_revision(&self, tier: DraftTier) -> u64 {
        match tier {
            DraftTier::Source => self.revision,
            DraftTier::Review => self.review.revision,
            DraftTier::AiReview => self.ai_review.revision,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(id: &str, ty: &str, index: usize) -> ModuleInstance {
        ModuleInstance {
            id: id.to_string(),
            module_type: ty.to_string(),
            order_index: index,
            props: FieldMap::new(),
            schema: ModuleSchema::default(),
        }
    }

    #[test]
    fn tier_columns_are_distinct() {
        let columns = [
            DraftTier::Source.column(),
            DraftTier::Review.column(),
            DraftTier::AiReview.column(),
        ];
        assert_eq!(columns.len(), 3);
        assert_ne!(columns[0], columns[1]);
        assert_ne!(columns[1], columns[2]);
    }

    #[test]
    fn tier_serde_names() {
        assert_eq!(
            serde_json::to_string(&DraftTier::AiReview).unwrap(),
            "\"ai-review\""
        );
        let back: DraftTier = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(back, DraftTier::Review);
    }

    #[test]
    fn schema_kind_falls_back_to_first_segment() {
        let mut schema = ModuleSchema::default();
        schema.fields.insert("body".to_string(), FieldKind::Richtext);
        schema
            .fields
            .insert("cta".to_string(), FieldKind::Reference);
        assert_eq!(schema.kind_of("body"), FieldKind::Richtext);
        assert_eq!(schema.kind_of("cta.target"), FieldKind::Reference);
        assert_eq!(schema.kind_of("headline"), FieldKind::Plain);
    }

    #[test]
    fn modules_of_type_sorted_by_order_index() {
        let mut post = PostSnapshot::new("p1");
        post.modules = vec![
            module("m2", "hero", 1),
            module("m3", "quote", 0),
            module("m1", "hero", 0),
        ];
        let heroes = post.modules_of_type("hero");
        assert_eq!(heroes.len(), 2);
        assert_eq!(heroes[0].id, "m1");
        assert_eq!(heroes[1].id, "m2");
    }

    #[test]
    fn empty_draft_is_empty() {
        let draft = TierDraft::default();
        assert!(draft.is_empty());

        let mut with_post = TierDraft::default();
        with_post.post.insert("title".to_string(), json!("X"));
        assert!(!with_post.is_empty());
    }

    #[test]
    fn snapshot_tier_revisions() {
        let mut post = PostSnapshot::new("p1");
        post.revision = 3;
        post.review.revision = 7;
        assert_eq!(post.tier_revision(DraftTier::Source), 3);
        assert_eq!(post.tier_revision(DraftTier::Review), 7);
        assert_eq!(post.tier_revision(DraftTier::AiReview), 0);
    }

    #[test]
    fn snapshot_serde_round_trip() {
        let mut post = PostSnapshot::new("p1");
        post.fields.insert("title".to_string(), json!("Old"));
        post.modules.push(module("m1", "hero", 0));
        post.ai_review.post.insert("title".to_string(), json!("New"));

        let raw = serde_json::to_string(&post).unwrap();
        let back: PostSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, "p1");
        assert_eq!(back.fields["title"], "Old");
        assert_eq!(back.ai_review.post["title"], "New");
        assert_eq!(back.modules[0].module_type, "hero");
    }
}
