//! The multi-turn tool-calling loop.
//!
//! Drives the protocol: call the completion provider, parse the reply,
//! execute any requested tools (artifact-generating ones first, with
//! same-turn placeholder substitution), feed the results back, and repeat
//! until the model stops requesting tools or the turn cap is hit.
//!
//! The cap is the system's only bound on runaway execution — there is no
//! wall-clock timeout.

use serde::Serialize;
use tracing::{debug, info, warn};

use redraft_config::AgentDefinition;
use redraft_llm::{
    CompletionClient, CompletionError, Message, Usage, extract_json_value,
};
use redraft_tools::{ToolCall, ToolExecution, ToolInvoker, ToolOutcome, created_post_id};

use crate::context::ExecutionContext;
use crate::placeholder::PlaceholderResolver;
use crate::prompt_builder::build_tool_results_message;

/// Hard cap on completion→tools round-trips per session.
pub const MAX_TURNS: usize = 10;

// ── Transcript ───────────────────────────────────────────────────────────────

/// Append-only audit record of one turn. Raw model output and reasoning are
/// captured only in debug mode.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub turn: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub results: Vec<ToolOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Everything the loop produced, handed to finalization.
#[derive(Debug, Clone)]
pub struct TurnLoopOutcome {
    /// The terminal completion text.
    pub raw: String,
    pub transcript: Vec<TranscriptEntry>,
    /// Every tool execution from every turn, in execution order.
    pub executions: Vec<ToolExecution>,
    /// Most recent content-creation result (clone/translation) — drives the
    /// redirect-safety rule downstream.
    pub created_post_id: Option<String>,
    pub usage: Usage,
    /// The model was still requesting tools when the cap was reached.
    pub turn_capped: bool,
}

// ── Loop ─────────────────────────────────────────────────────────────────────

pub struct TurnLoop<'a> {
    client: &'a dyn CompletionClient,
    invoker: &'a dyn ToolInvoker,
    resolver: &'a PlaceholderResolver,
}

impl<'a> TurnLoop<'a> {
    pub fn new(
        client: &'a dyn CompletionClient,
        invoker: &'a dyn ToolInvoker,
        resolver: &'a PlaceholderResolver,
    ) -> Self {
        Self {
            client,
            invoker,
            resolver,
        }
    }

    /// Run the loop to termination or the turn cap.
    ///
    /// Strictly sequential: no turn starts before the previous turn's tool
    /// executions finish, and tool calls within a turn run one at a time so
    /// a later call can reference an earlier call's artifact.
    pub async fn run(
        &self,
        agent: &AgentDefinition,
        ctx: &ExecutionContext,
        mut messages: Vec<Message>,
    ) -> Result<TurnLoopOutcome, CompletionError> {
        let mut transcript: Vec<TranscriptEntry> = Vec::new();
        let mut executions: Vec<ToolExecution> = Vec::new();
        let mut created_post_id: Option<String> = None;
        let mut usage = Usage::default();
        let mut raw = String::new();

        for turn in 0..MAX_TURNS {
            debug!(turn, messages = messages.len(), "completion call");
            let response = self.client.complete(&messages, &agent.completion).await?;
            usage.accumulate(response.usage);
            raw = response.content;

            let parsed = extract_json_value(&raw);
            let mid_turn_summary = parsed
                .as_ref()
                .and_then(|v| v.get("summary"))
                .and_then(|v| v.as_str())
                .map(str::to_string);

            let calls = if agent.completion.tool_use {
                parsed.as_ref().map(ToolCall::many_from).unwrap_or_default()
            } else {
                Vec::new()
            };

            if calls.is_empty() {
                // Terminal: no tool use, no tool_calls array, or an empty
                // one — the current text is the final content.
                transcript.push(TranscriptEntry {
                    turn,
                    summary: mid_turn_summary,
                    tool_calls: Vec::new(),
                    results: Vec::new(),
                    raw_output: ctx.debug.then(|| raw.clone()),
                    reasoning: debug_reasoning(ctx, parsed.as_ref()),
                });
                return Ok(TurnLoopOutcome {
                    raw,
                    transcript,
                    executions,
                    created_post_id,
                    usage,
                    turn_capped: false,
                });
            }

            info!(turn, count = calls.len(), "model requested tool calls");
            let turn_executions = self
                .execute_turn(agent, ctx, calls, &mut created_post_id)
                .await;

            messages.push(Message::assistant(&raw));
            messages.push(Message::user(build_tool_results_message(&turn_executions)));

            transcript.push(TranscriptEntry {
                turn,
                summary: mid_turn_summary,
                tool_calls: turn_executions.iter().map(|e| e.call.clone()).collect(),
                results: turn_executions.iter().map(|e| e.outcome.clone()).collect(),
                raw_output: ctx.debug.then(|| raw.clone()),
                reasoning: debug_reasoning(ctx, parsed.as_ref()),
            });
            executions.extend(turn_executions);
        }

        warn!("turn cap ({MAX_TURNS}) reached while the model was still requesting tools");
        Ok(TurnLoopOutcome {
            raw,
            transcript,
            executions,
            created_post_id,
            usage,
            turn_capped: true,
        })
    }

    /// Execute one turn's calls sequentially, artifact-generating tools
    /// first (stable within each partition).
    async fn execute_turn(
        &self,
        agent: &AgentDefinition,
        ctx: &ExecutionContext,
        mut calls: Vec<ToolCall>,
        created: &mut Option<String>,
    ) -> Vec<ToolExecution> {
        calls.sort_by_key(|call| !call.generates_artifact());

        let mut turn_executions: Vec<ToolExecution> = Vec::new();
        for call in calls {
            let mut params = call.params.clone();
            self.resolver.resolve_params(&mut params, &turn_executions);

            let outcome = if !agent.completion.tool_allowed(&call.name) {
                warn!(tool = %call.name, agent = %agent.id, "tool not in allow-list");
                ToolOutcome::Failure {
                    error: format!("tool '{}' is not allowed for agent '{}'", call.name, agent.id),
                }
            } else {
                match self
                    .invoker
                    .call_tool(&call.name, &params, &agent.id, ctx.scope)
                    .await
                {
                    Ok(result) => {
                        if let Some(id) = created_post_id(&call.name, &result) {
                            // Last one wins: redirect safety tracks the most
                            // recently created content item.
                            *created = Some(id);
                        }
                        ToolOutcome::Success { result }
                    }
                    // One failed call never aborts its siblings.
                    Err(error) => {
                        warn!(tool = %call.name, %error, "tool call failed");
                        ToolOutcome::Failure {
                            error: error.to_string(),
                        }
                    }
                }
            };

            turn_executions.push(ToolExecution {
                call: ToolCall::new(call.name, params),
                outcome,
            });
        }
        turn_executions
    }
}

fn debug_reasoning(ctx: &ExecutionContext, parsed: Option<&serde_json::Value>) -> Option<String> {
    if !ctx.debug {
        return None;
    }
    parsed
        .and_then(|v| v.get("reasoning").or_else(|| v.get("determination")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artifact_first_partition_is_stable() {
        let mut calls = vec![
            ToolCall::new("fetch_links", json!({"n": 1})),
            ToolCall::new("generate_image", json!({"n": 2})),
            ToolCall::new("search_posts", json!({"n": 3})),
            ToolCall::new("generate_video", json!({"n": 4})),
        ];
        calls.sort_by_key(|call| !call.generates_artifact());
        let order: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            order,
            vec!["generate_image", "generate_video", "fetch_links", "search_posts"]
        );
    }

    #[test]
    fn transcript_entry_hides_absent_debug_fields() {
        let entry = TranscriptEntry {
            turn: 0,
            summary: None,
            tool_calls: vec![],
            results: vec![],
            raw_output: None,
            reasoning: None,
        };
        let raw = serde_json::to_string(&entry).unwrap();
        assert!(!raw.contains("raw_output"));
        assert!(!raw.contains("reasoning"));
        assert!(!raw.contains("summary"));
    }
}
