use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("agent '{agent}': {problem}")]
    Invalid { agent: String, problem: String },
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ── Agent scope ──────────────────────────────────────────────────────────────

/// Where an agent is allowed to run.
///
/// | Scope      | Meaning                                                    |
/// |------------|------------------------------------------------------------|
/// | `global`   | Whole-system invocations (batch jobs, scheduled passes).   |
/// | `dropdown` | Manually triggered on one post from the editor dropdown.   |
/// | `field`    | Bound to a single field the user is actively editing.      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentScope {
    Global,
    Dropdown,
    Field,
}

impl AgentScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Dropdown => "dropdown",
            Self::Field => "field",
        }
    }
}

// ── Open-ended instruction feature ───────────────────────────────────────────

/// Per-agent opt-in for a free-text instruction supplied at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenInstructionConfig {
    pub enabled: bool,
    /// Maximum instruction length in characters.  Longer input is truncated
    /// before it reaches the prompt.
    pub max_length: usize,
}

impl Default for OpenInstructionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_length: 500,
        }
    }
}

// ── Completion settings ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    /// When `false` the agent runs single-shot: the first completion is the
    /// final answer and any `tool_calls` in it are ignored.
    pub tool_use: bool,
    /// Allow-list of tool names the agent may invoke.  `None` means every
    /// tool offered by the invoker is permitted.
    pub allowed_tools: Option<Vec<String>>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: String::new(),
            temperature: 0.7,
            tool_use: true,
            allowed_tools: None,
        }
    }
}

impl CompletionSettings {
    /// `true` when `name` passes the allow-list (or no list is configured).
    pub fn tool_allowed(&self, name: &str) -> bool {
        match &self.allowed_tools {
            Some(list) => list.iter().any(|t| t == name),
            None => true,
        }
    }
}

// ── Agent definition ─────────────────────────────────────────────────────────

/// A single agent as loaded from the catalog.  Read-only at execution time —
/// sessions borrow the definition and never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    /// Scopes this agent may be invoked in.
    pub scopes: Vec<AgentScope>,
    /// System-prompt template.  `{{variable}}` markers are interpolated with
    /// context values (agent_name, post_id, field_key, scope, …) at run time.
    pub instructions: String,
    pub open_instruction: OpenInstructionConfig,
    pub completion: CompletionSettings,
}

impl Default for AgentDefinition {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            scopes: vec![AgentScope::Dropdown],
            instructions: String::new(),
            open_instruction: OpenInstructionConfig::default(),
            completion: CompletionSettings::default(),
        }
    }
}

impl AgentDefinition {
    pub fn allows_scope(&self, scope: AgentScope) -> bool {
        self.scopes.contains(&scope)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let problem = |problem: &str| ConfigError::Invalid {
            agent: if self.id.is_empty() {
                "<unnamed>".to_string()
            } else {
                self.id.clone()
            },
            problem: problem.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(problem("empty id"));
        }
        if self.scopes.is_empty() {
            return Err(problem("no scopes configured"));
        }
        if self.completion.provider.trim().is_empty() {
            return Err(problem("completion.provider is empty"));
        }
        if self.completion.model.trim().is_empty() {
            return Err(problem("completion.model is empty"));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(problem("completion.temperature out of range (0.0–2.0)"));
        }
        if self.open_instruction.enabled && self.open_instruction.max_length == 0 {
            return Err(problem("open_instruction.max_length must be > 0 when enabled"));
        }
        Ok(())
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// The loaded set of agent definitions.  Constructed explicitly and passed
/// into each execution session — there is no ambient global registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCatalog {
    pub agents: Vec<AgentDefinition>,
}

impl AgentCatalog {
    pub fn new(agents: Vec<AgentDefinition>) -> Self {
        Self { agents }
    }

    pub fn get(&self, id: &str) -> Result<&AgentDefinition, ConfigError> {
        self.agents
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| ConfigError::UnknownAgent(id.to_string()))
    }

    /// Load a catalog from a TOML file and validate every entry.
    ///
    /// The `REDRAFT_PROVIDER` environment variable, when set and non-empty,
    /// overrides the provider on every agent (useful for pointing a whole
    /// deployment at a proxy without editing the catalog).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        let mut catalog: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })?;

        if let Ok(provider) = env::var("REDRAFT_PROVIDER") {
            if !provider.is_empty() {
                for agent in &mut catalog.agents {
                    agent.completion.provider = provider.clone();
                }
            }
        }

        catalog.validate()?;
        Ok(catalog)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, rendered)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for agent in &self.agents {
            agent.validate()?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_agent(id: &str) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            name: "Test Agent".to_string(),
            completion: CompletionSettings {
                model: "gpt-4o-mini".to_string(),
                ..CompletionSettings::default()
            },
            ..AgentDefinition::default()
        }
    }

    #[test]
    fn defaults_are_safe() {
        let def = AgentDefinition::default();
        assert_eq!(def.scopes, vec![AgentScope::Dropdown]);
        assert!(!def.open_instruction.enabled);
        assert_eq!(def.open_instruction.max_length, 500);
        assert!(def.completion.tool_use);
        assert!(def.completion.allowed_tools.is_none());
    }

    #[test]
    fn tool_allowed_without_list_permits_everything() {
        let settings = CompletionSettings::default();
        assert!(settings.tool_allowed("generate_image"));
        assert!(settings.tool_allowed("anything"));
    }

    #[test]
    fn tool_allowed_with_list_is_exact() {
        let settings = CompletionSettings {
            allowed_tools: Some(vec!["generate_image".to_string()]),
            ..CompletionSettings::default()
        };
        assert!(settings.tool_allowed("generate_image"));
        assert!(!settings.tool_allowed("generate_video"));
    }

    #[test]
    fn catalog_lookup() {
        let catalog = AgentCatalog::new(vec![valid_agent("seo"), valid_agent("tone")]);
        assert_eq!(catalog.get("tone").unwrap().id, "tone");
        assert!(matches!(
            catalog.get("missing"),
            Err(ConfigError::UnknownAgent(_))
        ));
    }

    #[test]
    fn validation_rejects_empty_model() {
        let mut agent = valid_agent("a");
        agent.completion.model.clear();
        let catalog = AgentCatalog::new(vec![agent]);
        assert!(matches!(
            catalog.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn validation_rejects_out_of_range_temperature() {
        let mut agent = valid_agent("a");
        agent.completion.temperature = 3.5;
        assert!(AgentCatalog::new(vec![agent]).validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_instruction_length_when_enabled() {
        let mut agent = valid_agent("a");
        agent.open_instruction = OpenInstructionConfig {
            enabled: true,
            max_length: 0,
        };
        assert!(AgentCatalog::new(vec![agent]).validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agents.toml");

        let mut agent = valid_agent("rewrite");
        agent.scopes = vec![AgentScope::Dropdown, AgentScope::Field];
        agent.instructions = "You rewrite copy for {{agent_name}}.".to_string();
        agent.completion.allowed_tools = Some(vec!["generate_image".to_string()]);
        let catalog = AgentCatalog::new(vec![agent]);

        catalog.save_to(&path).unwrap();
        let loaded = AgentCatalog::load_from(&path).unwrap();
        assert_eq!(loaded.agents.len(), 1);
        let back = loaded.get("rewrite").unwrap();
        assert_eq!(back.scopes, vec![AgentScope::Dropdown, AgentScope::Field]);
        assert_eq!(
            back.completion.allowed_tools.as_deref(),
            Some(&["generate_image".to_string()][..])
        );
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = AgentCatalog::load_from("/nonexistent/agents.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn scope_serde_uses_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentScope::Dropdown).unwrap(),
            "\"dropdown\""
        );
        let back: AgentScope = serde_json::from_str("\"field\"").unwrap();
        assert_eq!(back, AgentScope::Field);
    }
}
