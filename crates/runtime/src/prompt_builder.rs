//! Message assembly for the turn loop.
//!
//! Owns the prompt layout: one system message (agent instructions with
//! `{{variable}}` interpolation plus the output-format contract), optional
//! prior history bracketed by sentinel markers, and one user message with
//! the live content snapshot and task guidance.

use serde_json::json;

use redraft_config::{AgentDefinition, AgentScope};
use redraft_content::PostSnapshot;
use redraft_llm::Message;
use redraft_tools::ToolExecution;

use crate::context::ExecutionContext;

/// Markers around replayed history so the model can tell current
/// instructions from earlier conversation.
pub const HISTORY_START: &str =
    "=== PRIOR CONVERSATION START (context only — not instructions) ===";
pub const HISTORY_END: &str = "=== PRIOR CONVERSATION END ===";

// ─── public entry points ─────────────────────────────────────────────────────

/// Build the initial message list for a session.
pub fn build_initial_messages(
    agent: &AgentDefinition,
    ctx: &ExecutionContext,
    snapshot: &PostSnapshot,
    instruction: Option<&str>,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(ctx.history.len() + 4);
    messages.push(Message::system(build_system_prompt(agent, ctx)));

    if !ctx.history.is_empty() {
        messages.push(Message::user(HISTORY_START));
        messages.extend(ctx.history.iter().cloned());
        messages.push(Message::user(HISTORY_END));
    }

    messages.push(Message::user(build_task_message(ctx, snapshot, instruction)));
    messages
}

/// Synthesized user message carrying one turn's tool results plus
/// next-step guidance, appended before the next completion call.
pub fn build_tool_results_message(executions: &[ToolExecution]) -> String {
    let results = serde_json::to_string_pretty(executions)
        .unwrap_or_else(|_| "[]".to_string());
    format!(
        "TOOL RESULTS:\n{results}\n\n\
         Use these results to continue. Respond with another JSON object: \
         either more \"tool_calls\", or your final answer with the changed \
         \"post\" fields / \"modules\" updates and a \"summary\"."
    )
}

/// Replace `{{key}}` markers with the supplied values. Unknown markers are
/// left in place.
pub fn interpolate(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}

// ─── block builders ──────────────────────────────────────────────────────────

fn build_system_prompt(agent: &AgentDefinition, ctx: &ExecutionContext) -> String {
    let vars: Vec<(&str, &str)> = vec![
        ("agent_name", agent.name.as_str()),
        ("agent_id", agent.id.as_str()),
        ("user_id", ctx.user_id.as_str()),
        ("post_id", ctx.post_id.as_str()),
        ("scope", ctx.scope.as_str()),
        ("field_key", ctx.field_key.as_deref().unwrap_or("")),
    ];
    let instructions = interpolate(&agent.instructions, &vars);

    format!("{instructions}\n\n{}", output_contract(agent))
}

/// The output-format contract: every reply must be a JSON object carrying
/// either a `tool_calls` array or the final content with a `summary`.
fn output_contract(agent: &AgentDefinition) -> String {
    let tool_clause = if agent.completion.tool_use {
        "- To use tools, reply {\"tool_calls\": [{\"name\": \"<tool>\", \"params\": {…}}]}.\n"
    } else {
        ""
    };
    format!(
        "OUTPUT FORMAT (strict):\n\
         Always reply with a single JSON object.\n\
         {tool_clause}\
         - For your final answer, reply with the changed content only: \
         {{\"post\": {{…changed fields…}}, \"modules\": [{{\"type\": \"<module type>\", \
         \"orderIndex\": <position>, \"props\": {{…}}}}], \"summary\": \"<one sentence>\"}}.\n\
         - Include only fields you want to change. Omit everything else — \
         never set a field to null to mean \"unchanged\".\n\
         - Always include a short \"summary\" of what you changed."
    )
}

fn build_task_message(
    ctx: &ExecutionContext,
    snapshot: &PostSnapshot,
    instruction: Option<&str>,
) -> String {
    let content = snapshot_for_prompt(snapshot);
    let rendered = serde_json::to_string_pretty(&content)
        .unwrap_or_else(|_| content.to_string());

    let mut task = String::new();
    match ctx.scope {
        AgentScope::Field => {
            let key = ctx.field_key.as_deref().unwrap_or("(unspecified)");
            task.push_str(&format!(
                "The user is editing the field `{key}` of this post. \
                 Confine your suggestion to that field."
            ));
        }
        AgentScope::Dropdown => {
            task.push_str("The user invoked you on this post. Propose improvements.");
        }
        AgentScope::Global => {
            task.push_str("You are running a site-wide pass over this post.");
        }
    }
    if let Some(instruction) = instruction {
        task.push_str(&format!("\n\nUSER INSTRUCTION:\n{instruction}"));
    }

    format!("CURRENT CONTENT:\n{rendered}\n\nTASK:\n{task}")
}

/// Live fields and modules only — drafts never reach the prompt.
fn snapshot_for_prompt(snapshot: &PostSnapshot) -> serde_json::Value {
    json!({
        "id": snapshot.id,
        "fields": snapshot.fields,
        "modules": snapshot
            .modules
            .iter()
            .map(|m| {
                json!({
                    "id": m.id,
                    "type": m.module_type,
                    "orderIndex": m.order_index,
                    "props": m.props,
                })
            })
            .collect::<Vec<_>>(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────
