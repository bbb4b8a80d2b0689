//! OpenAI-compatible chat-completions oracle (OpenRouter by default).
//!
//! A reply cut off at the token limit (`finish_reason == "length"`) is
//! continued: the partial answer goes back as an assistant turn followed by a
//! `continue` user turn, up to `max_continuations` times, and the parts are
//! concatenated.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{GenerationRequest, OracleError, SuggestionOracle};

/// Default endpoint base.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model id.
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-lite";

/// Default bound on continuation calls per generation.
pub const DEFAULT_MAX_CONTINUATIONS: u32 = 3;

const CONTINUE_PROMPT: &str = "continue";

const SYSTEM_PROMPT: &str = "You rewrite sections of decision-tree protocol documents. \
Respond with a single JSON object and nothing else.";

/// Connection settings for [`HttpOracle`].
#[derive(Clone, Serialize, Deserialize)]
pub struct HttpOracleConfig {
    /// API base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Bearer token. Never serialized or printed.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Model id.
    pub model: String,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Transport timeout in seconds.
    pub timeout_secs: u64,
    /// Follow-up calls allowed when a reply is truncated.
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
}

fn default_max_continuations() -> u32 {
    DEFAULT_MAX_CONTINUATIONS
}

impl std::fmt::Debug for HttpOracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOracleConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_continuations", &self.max_continuations)
            .finish()
    }
}

impl HttpOracleConfig {
    /// Build a config with defaults for everything except the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 20_000,
            temperature: 0.2,
            timeout_secs: 120,
            max_continuations: DEFAULT_MAX_CONTINUATIONS,
        }
    }

    /// Read `OPENROUTER_API_KEY`, plus optional `RECON_ORACLE_BASE_URL` and
    /// `RECON_ORACLE_MODEL`.
    pub fn from_env() -> Result<Self, OracleError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| OracleError::NotConfigured("OPENROUTER_API_KEY not set".to_string()))?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("RECON_ORACLE_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("RECON_ORACLE_MODEL") {
            config.model = model;
        }
        Ok(config)
    }
}

/// Oracle backed by a chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    http: reqwest::Client,
    config: HttpOracleConfig,
}

impl HttpOracle {
    /// Build the client.
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| OracleError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    /// Get the config.
    pub fn config(&self) -> &HttpOracleConfig {
        &self.config
    }
}

/// One chat-completions reply.
struct Completion {
    content: String,
    finish_reason: String,
}

impl Completion {
    fn truncated(&self) -> bool {
        self.finish_reason == "length"
    }
}

impl HttpOracle {
    async fn complete(&self, messages: &[Value], request: &GenerationRequest) -> Result<Completion, OracleError> {
        let endpoint = format!("{}/chat/completions", self.config.base_url);
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    OracleError::Timeout(self.config.timeout_secs)
                } else {
                    OracleError::Transport(err.to_string())
                }
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN => {
                return Err(OracleError::Auth)
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(OracleError::RateLimited),
            status if status.is_server_error() => {
                return Err(OracleError::Transport(format!("status {status}")));
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                let body: String = body.chars().take(500).collect();
                return Err(OracleError::InvalidResponse(format!("status {status} body {body}")));
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| OracleError::InvalidResponse(err.to_string()))?;
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| OracleError::InvalidResponse("missing choices".to_string()))?;
        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let usage = body.get("usage");

        tracing::debug!(
            section_id = %request.section_id(),
            attempt = request.attempt,
            finish_reason,
            prompt_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_u64).unwrap_or(0),
            completion_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64).unwrap_or(0),
            "Oracle response received"
        );

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| OracleError::InvalidResponse("missing message content".to_string()))?;
        Ok(Completion {
            content: content.to_string(),
            finish_reason: finish_reason.to_string(),
        })
    }
}

#[async_trait]
impl SuggestionOracle for HttpOracle {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, OracleError> {
        let mut messages = vec![
            serde_json::json!({"role": "system", "content": SYSTEM_PROMPT}),
            serde_json::json!({"role": "user", "content": request.prompt}),
        ];
        let mut output = String::new();
        let mut continuations = 0;

        loop {
            let completion = self.complete(&messages, request).await?;
            output.push_str(&completion.content);
            if !completion.truncated() {
                break;
            }
            if continuations >= self.config.max_continuations {
                tracing::warn!(
                    section_id = %request.section_id(),
                    continuations,
                    max_tokens = self.config.max_tokens,
                    "Oracle output still truncated at continuation limit"
                );
                break;
            }
            continuations += 1;
            tracing::info!(
                section_id = %request.section_id(),
                continuation = continuations,
                chars = output.len(),
                "Oracle output truncated, continuing"
            );
            messages.push(serde_json::json!({"role": "assistant", "content": completion.content}));
            messages.push(serde_json::json!({"role": "user", "content": CONTINUE_PROMPT}));
        }

        if output.trim().is_empty() {
            return Err(OracleError::InvalidResponse("empty message content".to_string()));
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
