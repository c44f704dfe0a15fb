//! Draft merge engine.
//!
//! Takes the loop's suggested content plus the current post snapshot and
//! computes the new draft for the target tier.  The merge is field-granular
//! and strictly additive: only keys present in the suggestion can change
//! anything, stale base content and existing drafts are reconciled through
//! a structural deep merge, and a failed module lookup skips that one
//! update instead of aborting the rest.

mod deep;
mod richtext;

pub use deep::{deep_merge, get_dotted, merge_maps, set_dotted};
pub use richtext::{markdown_to_doc, normalize_props};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use redraft_config::AgentScope;
use redraft_content::{
    DraftTier, FieldMap, ModuleInstance, PostSnapshot, SuggestedContent, TierDraft,
};

// ── Tier selection ───────────────────────────────────────────────────────────

/// Which tier a merge writes to.
///
/// Field-scoped invocations land in whatever view the user was editing
/// (defaulting to the live content); everything else goes to `ai-review` —
/// agents never write into `review` or approved content on their own.
pub fn target_tier(scope: AgentScope, view: Option<DraftTier>) -> DraftTier {
    match scope {
        AgentScope::Field => view.unwrap_or(DraftTier::Source),
        AgentScope::Global | AgentScope::Dropdown => DraftTier::AiReview,
    }
}

// ── Field targeting ──────────────────────────────────────────────────────────

/// Target of a field-scoped invocation.
#[derive(Debug, Clone)]
pub struct FieldTarget {
    /// Field key as encoded by the editor: a bare post field name, or
    /// `module.<type>.<dotted-field-path>` for a module field.
    pub key: String,
    /// Exact module instance the user was editing, when the editor knows it.
    pub module_instance_id: Option<String>,
}

/// Parsed form of a field key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKeyTarget {
    PostField(String),
    ModuleField { module_type: String, path: String },
}

pub fn parse_field_key(key: &str) -> FieldKeyTarget {
    if let Some(rest) = key.strip_prefix("module.") {
        if let Some((module_type, path)) = rest.split_once('.') {
            if !module_type.is_empty() && !path.is_empty() {
                return FieldKeyTarget::ModuleField {
                    module_type: module_type.to_string(),
                    path: path.to_string(),
                };
            }
        }
    }
    FieldKeyTarget::PostField(key.to_string())
}

// ── Media artifacts ──────────────────────────────────────────────────────────

/// A generated media artifact to auto-place into the edited field.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaArtifact {
    pub id: String,
    pub alt: Option<String>,
    pub description: Option<String>,
}

impl MediaArtifact {
    /// Build from a generation-tool result payload.
    pub fn from_result(result: &Value) -> Option<Self> {
        let id = ["mediaId", "media_id", "assetId", "asset_id", "id"]
            .iter()
            .find_map(|key| result.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())?
            .to_string();
        let text_at = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| result.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        };
        Some(Self {
            id,
            alt: text_at(&["alt", "altText", "alt_text"]),
            description: text_at(&["description", "caption"]),
        })
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedModule {
    pub module_id: String,
    pub module_type: String,
    pub order_index: usize,
}

/// What a merge actually changed — callers report this back instead of a
/// blanket success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedChanges {
    pub post_fields: Vec<String>,
    pub modules: Vec<AppliedModule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedUpdate {
    pub module_type: String,
    pub order_index: Option<usize>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The new draft for the target tier (the store assigns the revision).
    pub draft: TierDraft,
    pub applied: AppliedChanges,
    pub skipped: Vec<SkippedUpdate>,
}

// ── Merge ────────────────────────────────────────────────────────────────────

/// Merge `suggestion` into `tier` for `snapshot`.
///
/// Pure — the caller persists `MergeOutcome::draft` afterwards, so a failed
/// write leaves every tier exactly as it was.
pub fn apply_suggestion(
    snapshot: &PostSnapshot,
    tier: DraftTier,
    suggestion: &SuggestedContent,
    field: Option<&FieldTarget>,
    media: Option<&MediaArtifact>,
) -> MergeOutcome {
    let mut suggestion = suggestion.clone();
    if let Some(field) = field {
        inject_field_target(&mut suggestion, snapshot, field, media);
    }

    let existing = snapshot.draft(tier).cloned().unwrap_or_default();
    let mut draft = existing.clone();
    let mut applied = AppliedChanges::default();
    let mut skipped = Vec::new();

    // Post-level fields.
    let post_base = post_field_base(snapshot, tier);
    let reconciled = merge_maps(&post_base, &existing.post);
    draft.post = match &suggestion.post {
        Some(incoming) => {
            applied.post_fields = incoming.keys().cloned().collect();
            merge_maps(&reconciled, incoming)
        }
        None => reconciled,
    };

    // Module updates.
    for update in &suggestion.modules {
        if update.is_empty() {
            continue;
        }
        let candidates = snapshot.modules_of_type(&update.module_type);
        let targets: Vec<&ModuleInstance> = match update.order_index {
            Some(index) => {
                match candidates.iter().find(|m| m.order_index == index) {
                    Some(instance) => vec![*instance],
                    None => {
                        warn!(
                            module_type = %update.module_type,
                            order_index = index,
                            "suggested module update has no matching instance, skipping"
                        );
                        skipped.push(SkippedUpdate {
                            module_type: update.module_type.clone(),
                            order_index: Some(index),
                            reason: "no instance at that position".to_string(),
                        });
                        continue;
                    }
                }
            }
            None if candidates.is_empty() => {
                warn!(
                    module_type = %update.module_type,
                    "suggested module update targets a type with no instances, skipping"
                );
                skipped.push(SkippedUpdate {
                    module_type: update.module_type.clone(),
                    order_index: None,
                    reason: "no instances of that type".to_string(),
                });
                continue;
            }
            // No index: fan the update out to every instance of the type.
            None => candidates,
        };

        for instance in targets {
            if !update.props.is_empty() {
                let incoming = normalize_props(&instance.schema, &update.props);
                let base = module_props_base(snapshot, tier, instance);
                let current = existing
                    .module_props
                    .get(&instance.id)
                    .cloned()
                    .unwrap_or_default();
                let merged = merge_maps(&merge_maps(&base, &current), &incoming);
                draft.module_props.insert(instance.id.clone(), merged);
            }
            if !update.overrides.is_empty() {
                let base = module_overrides_base(snapshot, tier, instance);
                let current = existing
                    .module_overrides
                    .get(&instance.id)
                    .cloned()
                    .unwrap_or_default();
                let merged = merge_maps(&merge_maps(&base, &current), &update.overrides);
                draft.module_overrides.insert(instance.id.clone(), merged);
            }
            applied.modules.push(AppliedModule {
                module_id: instance.id.clone(),
                module_type: instance.module_type.clone(),
                order_index: instance.order_index,
            });
        }
    }

    debug!(
        tier = tier.as_str(),
        post_fields = applied.post_fields.len(),
        modules = applied.modules.len(),
        skipped = skipped.len(),
        "merge computed"
    );
    MergeOutcome {
        draft,
        applied,
        skipped,
    }
}

/// Base post fields for `tier`: the next-lower tier's effective value when
/// that draft exists, else the live content.
fn post_field_base(snapshot: &PostSnapshot, tier: DraftTier) -> FieldMap {
    match tier {
        DraftTier::Source | DraftTier::Review => snapshot.fields.clone(),
        DraftTier::AiReview => {
            if snapshot.review.post.is_empty() {
                snapshot.fields.clone()
            } else {
                merge_maps(&snapshot.fields, &snapshot.review.post)
            }
        }
    }
}

fn module_props_base(
    snapshot: &PostSnapshot,
    tier: DraftTier,
    instance: &ModuleInstance,
) -> FieldMap {
    match tier {
        DraftTier::Source | DraftTier::Review => instance.props.clone(),
        DraftTier::AiReview => match snapshot.review.module_props.get(&instance.id) {
            Some(review_props) => merge_maps(&instance.props, review_props),
            None => instance.props.clone(),
        },
    }
}

fn module_overrides_base(
    snapshot: &PostSnapshot,
    tier: DraftTier,
    instance: &ModuleInstance,
) -> FieldMap {
    // Live content carries no override layer; only lower drafts contribute.
    match tier {
        DraftTier::Source | DraftTier::Review => FieldMap::new(),
        DraftTier::AiReview => snapshot
            .review
            .module_overrides
            .get(&instance.id)
            .cloned()
            .unwrap_or_default(),
    }
}

// ── Field-scope injection ────────────────────────────────────────────────────

/// Make a field-scoped suggestion land on the exact field the user was
/// editing: fill in missing module type/position, and place a generated
/// media artifact into the edited path.
fn inject_field_target(
    suggestion: &mut SuggestedContent,
    snapshot: &PostSnapshot,
    field: &FieldTarget,
    media: Option<&MediaArtifact>,
) {
    match parse_field_key(&field.key) {
        FieldKeyTarget::PostField(name) => {
            if let Some(media) = media {
                let post = suggestion.post.get_or_insert_with(FieldMap::new);
                place_media(post, &name, media);
            }
        }
        FieldKeyTarget::ModuleField { module_type, path } => {
            let order_index = field
                .module_instance_id
                .as_deref()
                .and_then(|id| snapshot.module_by_id(id))
                .map(|m| m.order_index);

            // The model often forgets to repeat the type/position it was
            // told about; fill them in from the invocation itself.
            for update in &mut suggestion.modules {
                if update.module_type.is_empty() {
                    update.module_type = module_type.clone();
                }
                if update.module_type == module_type && update.order_index.is_none() {
                    update.order_index = order_index;
                }
            }

            if let Some(media) = media {
                let position = suggestion
                    .modules
                    .iter()
                    .position(|u| u.module_type == module_type)
                    .unwrap_or_else(|| {
                        suggestion.modules.push(redraft_content::ModuleUpdate {
                            module_type: module_type.clone(),
                            order_index,
                            ..Default::default()
                        });
                        suggestion.modules.len() - 1
                    });
                place_media(&mut suggestion.modules[position].props, &path, media);
            }
        }
    }
}

/// Write the artifact id at `path` (unless the suggestion already set it)
/// and best-effort alt/description siblings: next to the id inside a nested
/// object, or as `<field>Alt`/`<field>Description` for a top-level field.
fn place_media(map: &mut FieldMap, path: &str, media: &MediaArtifact) {
    if get_dotted(map, path).is_none() {
        set_dotted(map, path, Value::String(media.id.clone()));
    }
    let (alt_path, description_path) = match path.rsplit_once('.') {
        Some((parent, _)) => (format!("{parent}.alt"), format!("{parent}.description")),
        None => (format!("{path}Alt"), format!("{path}Description")),
    };
    if let Some(alt) = &media.alt {
        if get_dotted(map, &alt_path).is_none() {
            set_dotted(map, &alt_path, Value::String(alt.clone()));
        }
    }
    if let Some(description) = &media.description {
        if get_dotted(map, &description_path).is_none() {
            set_dotted(map, &description_path, Value::String(description.clone()));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
