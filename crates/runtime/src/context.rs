//! Per-invocation execution context.

use redraft_config::AgentScope;
use redraft_content::DraftTier;
use redraft_llm::Message;

/// Everything one invocation carries besides the agent definition itself.
///
/// Ephemeral: owned by a single [`crate::ExecutionSession`] call and
/// discarded when it returns.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub agent_id: String,
    pub scope: AgentScope,
    pub user_id: String,
    pub post_id: String,
    /// View the user was editing — selects the target tier in field scope.
    pub view: Option<DraftTier>,
    /// Editor field key (`title`, `module.hero.image.src`, …) in field scope.
    pub field_key: Option<String>,
    /// Exact module instance being edited, when the editor knows it.
    pub module_instance_id: Option<String>,
    /// Prior conversation, replayed between sentinel markers in the prompt.
    pub history: Vec<Message>,
    /// Free-text instruction from the user (bounded by the agent's
    /// configured max length before it reaches the prompt).
    pub instruction: Option<String>,
    /// Capture raw model output and reasoning into the transcript.
    pub debug: bool,
}

impl ExecutionContext {
    pub fn new(
        agent_id: impl Into<String>,
        scope: AgentScope,
        user_id: impl Into<String>,
        post_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            scope,
            user_id: user_id.into(),
            post_id: post_id.into(),
            view: None,
            field_key: None,
            module_instance_id: None,
            history: Vec::new(),
            instruction: None,
            debug: false,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, instance_id: Option<String>) -> Self {
        self.field_key = Some(key.into());
        self.module_instance_id = instance_id;
        self
    }

    pub fn with_view(mut self, view: DraftTier) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }
}
