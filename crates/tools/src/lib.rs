//! Tool-invocation contract.
//!
//! The engine never executes tools itself — it hands a name and a parameter
//! object to an injected [`ToolInvoker`] and records the outcome.  What it
//! does own is the bookkeeping around calls: which tools produce artifacts
//! (and therefore run first within a turn), which create new content items
//! (tracked for redirect safety), and whether a call passes the agent's
//! allow-list.

mod artifact;

pub use artifact::ArtifactKind;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use redraft_config::AgentScope;

// ── Calls and outcomes ───────────────────────────────────────────────────────

/// One tool call as proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(alias = "tool")]
    pub name: String,
    #[serde(default, alias = "arguments", alias = "args")]
    pub params: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Read a `tool_calls` array out of a parsed reply.  Entries that are
    /// not objects with a usable name are dropped rather than failing the
    /// whole turn.
    pub fn many_from(reply: &Value) -> Vec<ToolCall> {
        reply
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|entry| {
                        let call: ToolCall = serde_json::from_value(entry.clone()).ok()?;
                        if call.name.trim().is_empty() {
                            return None;
                        }
                        Some(call)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Artifact-generating calls execute before all others within a turn.
    pub fn generates_artifact(&self) -> bool {
        ArtifactKind::for_tool(&self.name).is_some()
    }
}

/// Result of one tool call: a success payload or an error description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success { result: Value },
    Failure { error: String },
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success { result } => Some(result),
            Self::Failure { .. } => None,
        }
    }
}

/// A call paired with its outcome — one transcript line of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
}

impl ToolExecution {
    /// Id of the artifact this execution produced, when it is a successful
    /// artifact-generating call.
    pub fn artifact_id(&self) -> Option<(ArtifactKind, String)> {
        let kind = ArtifactKind::for_tool(&self.call.name)?;
        let id = artifact::extract_artifact_id(self.outcome.result()?)?;
        Some((kind, id))
    }
}

// ── Content-creation tracking ────────────────────────────────────────────────

/// Tools whose result is a brand-new content item (the redirect-safety rule
/// watches these).
const CREATION_TOOLS: &[&str] = &["clone_post", "translate_post", "create_post"];

/// Id of the post created by this call, if it is a content-creation tool
/// that reported one.
pub fn created_post_id(tool: &str, result: &Value) -> Option<String> {
    if !CREATION_TOOLS.contains(&tool) {
        return None;
    }
    for key in ["postId", "post_id", "newPostId", "id"] {
        if let Some(id) = result.get(key).and_then(Value::as_str) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

// ── Invoker contract ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("tool '{name}' failed: {message}")]
pub struct ToolError {
    pub name: String,
    pub message: String,
}

impl ToolError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Opaque capability that executes a named tool.  Implementations are
/// assumed safe for concurrent use by different sessions; the engine itself
/// performs no cross-session locking.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        params: &Value,
        agent_id: &str,
        scope: AgentScope,
    ) -> Result<Value, ToolError>;
}

/// Invoker that rejects every call.  Used by the CLI harness when no tool
/// backend is wired up, and by tests exercising failure paths.
pub struct NullToolInvoker;

#[async_trait]
impl ToolInvoker for NullToolInvoker {
    async fn call_tool(
        &self,
        name: &str,
        _params: &Value,
        _agent_id: &str,
        _scope: AgentScope,
    ) -> Result<Value, ToolError> {
        Err(ToolError::new(name, "no tool backend configured"))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
