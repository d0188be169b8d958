//! Inference clients for the model endpoint.
//!
//! Defines the [`InferenceClient`] trait and its implementations:
//!
//! - **[`DisabledClient`]**: refuses every call.
//! - **[`OllamaClient`]**: `POST /api/chat` on a local Ollama daemon.
//! - **[`OpenAiClient`]**: `POST /v1/chat/completions` on any
//!   OpenAI-compatible API.
//!
//! A client is built once at startup by [`create_client`] and shared as
//! `Arc<dyn InferenceClient>`. Calls are single, non-streaming requests with
//! no retry; the reply text is trimmed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::ChatTurn;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// One model endpoint: ordered turns in, one assistant text out.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Provider name for logs (`"ollama"`, `"openai"`, `"disabled"`).
    fn name(&self) -> &str;

    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String>;
}

/// Builds the client selected by `[llm] provider`.
///
/// # Errors
///
/// Unknown provider names, a missing `OPENAI_API_KEY` for the OpenAI
/// provider, or an HTTP client that cannot be constructed.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn InferenceClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClient)),
        "ollama" => Ok(Arc::new(OllamaClient::new(config)?)),
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(OpenAiClient::new(config, key)?))
        }
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Fails a non-2xx response with its status and body.
async fn check_status(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    bail!("{} API error {}: {}", provider, status, body_text)
}

// ============ Disabled ============

pub struct DisabledClient;

#[async_trait]
impl InferenceClient for DisabledClient {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn chat(&self, _model: &str, _turns: &[ChatTurn]) -> Result<String> {
        bail!("inference is disabled ([llm] provider = \"disabled\")")
    }
}

// ============ Ollama ============

pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    temperature: f32,
    max_tokens: u32,
    num_ctx: u32,
    keep_alive: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            url: base_url(config.url.as_deref(), DEFAULT_OLLAMA_URL),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            num_ctx: config.num_ctx,
            keep_alive: config.keep_alive.clone(),
        })
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": turns,
            "stream": false,
            "keep_alive": self.keep_alive,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
                "num_ctx": self.num_ctx,
            },
        });

        debug!(model, turns = turns.len(), "ollama chat request");
        let response = self
            .http
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let json: serde_json::Value = check_status("Ollama", response).await?.json().await?;
        parse_ollama_reply(&json)
    }
}

fn parse_ollama_reply(json: &serde_json::Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

// ============ OpenAI ============

pub struct OpenAiClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            url: base_url(config.url.as_deref(), DEFAULT_OPENAI_URL),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": turns,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        debug!(model, turns = turns.len(), "openai chat request");
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let json: serde_json::Value = check_status("OpenAI", response).await?.json().await?;
        parse_openai_reply(&json)
    }
}

fn parse_openai_reply(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| {
            anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content")
        })
}

fn base_url(configured: Option<&str>, default: &str) -> String {
    configured.unwrap_or(default).trim_end_matches('/').to_string()
}
