//! Completion-provider adapter.
//!
//! The turn loop only depends on the [`CompletionClient`] contract: an
//! ordered message list goes in, generated text plus token usage comes out.
//! [`HttpCompletionClient`] implements it against any OpenAI-compatible
//! chat-completions endpoint; tests inject scripted clients instead.

mod parse;

pub use parse::{ParsedReply, extract_json_value, parse_reply};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use redraft_config::CompletionSettings;

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the append-only conversation. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ── Usage ────────────────────────────────────────────────────────────────────

/// Token usage reported by the provider, accumulated across turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn accumulate(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Usage,
    /// Provider-specific extras (finish reason, model echo, …).
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// Missing provider/model/API key. Fatal — surfaced verbatim to callers.
    #[error("completion configuration error: {0}")]
    Configuration(String),
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

// ── Contract ─────────────────────────────────────────────────────────────────

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        settings: &CompletionSettings,
    ) -> Result<CompletionResponse, CompletionError>;
}

// ── HTTP adapter ─────────────────────────────────────────────────────────────

/// [`CompletionClient`] for OpenAI-compatible chat-completions APIs.
///
/// Provider, model, and API key are validated at construction so a
/// misconfigured agent fails before the first network call.
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCompletionClient {
    pub fn from_settings(settings: &CompletionSettings) -> Result<Self, CompletionError> {
        let provider = settings.provider.trim();
        if provider.is_empty() {
            return Err(CompletionError::Configuration(
                "no completion provider configured".to_string(),
            ));
        }
        if settings.model.trim().is_empty() {
            return Err(CompletionError::Configuration(format!(
                "no model configured for provider '{provider}'"
            )));
        }

        let (base_url, key_var) = match provider.to_ascii_lowercase().as_str() {
            "openai" => ("https://api.openai.com/v1".to_string(), "OPENAI_API_KEY"),
            "openrouter" => (
                "https://openrouter.ai/api/v1".to_string(),
                "OPENROUTER_API_KEY",
            ),
            other => {
                return Err(CompletionError::Configuration(format!(
                    "unknown completion provider '{other}'"
                )));
            }
        };

        let api_key = std::env::var(key_var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var("REDRAFT_API_KEY")
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
            .ok_or_else(|| {
                CompletionError::Configuration(format!(
                    "missing API key for provider '{provider}' (set {key_var} or REDRAFT_API_KEY)"
                ))
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        })
    }

    /// Point the client at a non-default endpoint (proxy, mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        messages: &[Message],
        settings: &CompletionSettings,
    ) -> Result<CompletionResponse, CompletionError> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": settings.model,
            "temperature": settings.temperature,
            "messages": messages,
        });

        debug!(model = %settings.model, count = messages.len(), "completion request");
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(CompletionError::Provider {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| CompletionError::Malformed("no choices[0].message.content".into()))?
            .to_string();

        let usage = body
            .get("usage")
            .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok())
            .unwrap_or_default();

        let mut metadata = serde_json::Map::new();
        if let Some(finish) = body
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
        {
            metadata.insert("finish_reason".to_string(), json!(finish));
        }
        if let Some(model) = body.get("model").and_then(|v| v.as_str()) {
            metadata.insert("model".to_string(), json!(model));
        }

        Ok(CompletionResponse {
            content,
            usage,
            metadata,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
