//! The execution session: one agent invocation end to end.
//!
//! Wires the turn loop, placeholder resolver, and merge engine together
//! with the injected collaborators (completion client, tool invoker,
//! content store) and owns the finalization sequence: redirect safety,
//! merge, optimistic draft write, revision append.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use redraft_config::{AgentCatalog, AgentDefinition, AgentScope, ConfigError};
use redraft_content::{ContentStore, DraftTier, StoreError, SuggestedContent};
use redraft_llm::{CompletionClient, CompletionError, Usage};
use redraft_merge::{
    AppliedChanges, FieldTarget, MediaArtifact, SkippedUpdate, apply_suggestion, target_tier,
};
use redraft_tools::ToolInvoker;

use crate::context::ExecutionContext;
use crate::finalize::finalize_reply;
use crate::placeholder::PlaceholderResolver;
use crate::prompt_builder::build_initial_messages;
use crate::turn_loop::{TranscriptEntry, TurnLoop};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Catalog(#[from] ConfigError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Retryable errors (currently only the optimistic-concurrency
    /// conflict) may be resubmitted by the caller unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_retryable())
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Successful session output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub suggestion: SuggestedContent,
    /// The terminal completion text, verbatim.
    pub raw: String,
    pub summary: String,
    pub transcript: Vec<TranscriptEntry>,
    pub usage: Usage,
    /// What the merge actually changed — partial success shows here.
    pub applied: AppliedChanges,
    pub skipped: Vec<SkippedUpdate>,
    /// Tier the merge wrote to, and its new revision. `None` revision when
    /// nothing needed writing.
    pub tier: DraftTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    /// A new post (translation/clone) the caller should navigate to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_post_id: Option<String>,
}

/// Serializable envelope for callers that want a flag instead of a
/// `Result` (the external function-call contract).
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub outcome: Option<SessionOutcome>,
}

impl AgentRunResult {
    pub fn from_run(result: Result<SessionOutcome, SessionError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                error: None,
                outcome: Some(outcome),
            },
            Err(err) => Self {
                success: false,
                error: Some(err.to_string()),
                outcome: None,
            },
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One-per-request orchestrator.  All collaborators are injected; the
/// session holds no global state and can run concurrently with other
/// sessions against the same collaborators.
pub struct ExecutionSession {
    catalog: AgentCatalog,
    client: Arc<dyn CompletionClient>,
    invoker: Arc<dyn ToolInvoker>,
    store: Arc<dyn ContentStore>,
}

impl ExecutionSession {
    pub fn new(
        catalog: AgentCatalog,
        client: Arc<dyn CompletionClient>,
        invoker: Arc<dyn ToolInvoker>,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            catalog,
            client,
            invoker,
            store,
        }
    }

    /// Run one invocation to completion.
    pub async fn run(&self, ctx: ExecutionContext) -> Result<SessionOutcome, SessionError> {
        let agent = self.catalog.get(&ctx.agent_id)?;
        if !agent.allows_scope(ctx.scope) {
            return Err(SessionError::Configuration(format!(
                "agent '{}' may not run in scope '{}'",
                agent.id,
                ctx.scope.as_str()
            )));
        }
        let instruction = bounded_instruction(agent, ctx.instruction.as_deref());

        let snapshot = self.store.load_post(&ctx.post_id).await?;
        let messages = build_initial_messages(agent, &ctx, &snapshot, instruction.as_deref());

        let resolver = PlaceholderResolver::new();
        let turn_loop = TurnLoop::new(&*self.client, &*self.invoker, &resolver);
        let loop_outcome = turn_loop.run(agent, &ctx, messages).await?;

        let mut finalized = finalize_reply(&loop_outcome.raw, ctx.debug);
        resolver.scrub_suggestion(&mut finalized.suggestion, &loop_outcome.executions);

        // Redirect safety: when a different post was created (translation,
        // clone) and the model didn't declare it as its own redirect, the
        // suggestion must not leak into the post being edited.
        let mut redirect_post_id = finalized.suggestion.redirect_post_id.clone();
        if let Some(new_id) = &loop_outcome.created_post_id {
            if *new_id != ctx.post_id && redirect_post_id.as_deref() != Some(new_id) {
                info!(%new_id, "redirecting to newly created post, discarding suggestion");
                finalized.suggestion.post = None;
                finalized.suggestion.modules.clear();
                redirect_post_id = Some(new_id.clone());
            }
        }

        let tier = target_tier(ctx.scope, ctx.view);
        let field_target = match ctx.scope {
            AgentScope::Field => ctx.field_key.as_ref().map(|key| FieldTarget {
                key: key.clone(),
                module_instance_id: ctx.module_instance_id.clone(),
            }),
            _ => None,
        };
        // Most recent successful artifact backs field-scoped auto-placement.
        let media = match &field_target {
            Some(_) => loop_outcome
                .executions
                .iter()
                .rev()
                .filter(|e| e.artifact_id().is_some())
                .find_map(|e| e.outcome.result().and_then(MediaArtifact::from_result)),
            None => None,
        };

        let merged = apply_suggestion(
            &snapshot,
            tier,
            &finalized.suggestion,
            field_target.as_ref(),
            media.as_ref(),
        );

        // Nothing applied → leave every tier exactly as it was.
        let revision = if merged.applied.post_fields.is_empty() && merged.applied.modules.is_empty()
        {
            None
        } else {
            let expected = snapshot.tier_revision(tier);
            let revision = self
                .store
                .write_draft(&ctx.post_id, tier, merged.draft.clone(), expected)
                .await?;
            self.store
                .append_revision(
                    &ctx.post_id,
                    json!({
                        "tier": tier,
                        "post": merged.draft.post,
                        "moduleProps": merged.draft.module_props,
                        "moduleOverrides": merged.draft.module_overrides,
                    }),
                )
                .await?;
            Some(revision)
        };

        let mut summary = finalized.summary;
        if loop_outcome.turn_capped {
            summary.push_str(" (max turns reached — output may be incomplete)");
        }

        info!(
            agent = %agent.id,
            post = %ctx.post_id,
            tier = tier.as_str(),
            applied_fields = merged.applied.post_fields.len(),
            applied_modules = merged.applied.modules.len(),
            "session finished"
        );

        Ok(SessionOutcome {
            suggestion: finalized.suggestion,
            raw: loop_outcome.raw,
            summary,
            transcript: loop_outcome.transcript,
            usage: loop_outcome.usage,
            applied: merged.applied,
            skipped: merged.skipped,
            tier,
            revision,
            redirect_post_id,
        })
    }
}

/// Apply the agent's open-ended instruction policy: drop when the feature
/// is disabled, truncate past the configured maximum.
fn bounded_instruction(agent: &AgentDefinition, instruction: Option<&str>) -> Option<String> {
    let instruction = instruction?.trim();
    if instruction.is_empty() {
        return None;
    }
    if !agent.open_instruction.enabled {
        warn!(agent = %agent.id, "open-ended instruction ignored (feature disabled)");
        return None;
    }
    let max = agent.open_instruction.max_length;
    let chars: Vec<char> = instruction.chars().collect();
    if chars.len() > max {
        warn!(
            agent = %agent.id,
            length = chars.len(),
            max,
            "open-ended instruction truncated"
        );
        return Some(chars.into_iter().take(max).collect());
    }
    Some(instruction.to_string())
}

// ── Tests ────────────────────────────────────────────────────────────────────
