//! LLM client implementations
//!
//! OpenAI-compatible and Ollama chat clients used for batched replacement
//! generation, plus a round-robin wrapper that fails over between models
//! when one is rate limited.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anon_core::{AnonError, LlmClient, LlmConfig, LlmProvider, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| AnonError::ConfigError(format!("HTTP client: {e}")))
}

fn transport_error(e: reqwest::Error, timeout_secs: u64) -> AnonError {
    if e.is_timeout() {
        AnonError::Timeout(timeout_secs)
    } else {
        AnonError::RemoteError(format!("Request failed: {e}"))
    }
}

// ============================================================================
// OpenAI Client
// ============================================================================

/// OpenAI-compatible chat completions client (also used for Azure)
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl OpenAiClient {
    /// Create from config for one model
    pub fn from_config(config: &LlmConfig, model: &str) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| AnonError::ConfigError("OpenAI API key required".to_string()))?;

        let base_url = config
            .openai_base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: api_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnonError::RemoteError(format!(
                "OpenAI error ({status}): {error_text}"
            )));
        }

        let result: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| AnonError::RemoteError(format!("Failed to parse response: {e}")))?;

        result
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| AnonError::RemoteError("No response generated".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Ollama chat client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Message,
}

impl OllamaClient {
    /// Create from config for one model
    pub fn from_config(config: &LlmConfig, model: &str) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnonError::RemoteError(format!(
                "Ollama error ({status}): {error_text}"
            )));
        }

        let result: OllamaResponse = response
            .json()
            .await
            .map_err(|e| AnonError::RemoteError(format!("Failed to parse Ollama response: {e}")))?;

        Ok(result.message.content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Round Robin
// ============================================================================

/// Rotates requests across several clients, moving on to the next one when
/// a client is rate limited or times out
pub struct RoundRobinClient {
    clients: Vec<Arc<dyn LlmClient>>,
    cursor: AtomicUsize,
}

impl RoundRobinClient {
    pub fn new(clients: Vec<Arc<dyn LlmClient>>) -> Self {
        Self {
            clients,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl LlmClient for RoundRobinClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let count = self.clients.len();
        if count == 0 {
            return Err(AnonError::RemoteError("No LLM clients configured".to_string()));
        }

        let start = self.cursor.load(Ordering::Relaxed) % count;
        let mut last_error = None;

        for offset in 0..count {
            let idx = (start + offset) % count;
            let client = &self.clients[idx];

            match client.chat(system_prompt, user_prompt).await {
                Ok(text) => {
                    self.cursor.store((idx + 1) % count, Ordering::Relaxed);
                    return Ok(text);
                }
                Err(e) if e.is_rate_limited() => {
                    tracing::warn!(client = client.name(), error = %e, "LLM rate limited, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| AnonError::RemoteError("All LLM clients failed".to_string())))
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create the remote client described by `config`; `None` when remote
/// generation is disabled
pub fn create_llm_client(config: &LlmConfig) -> Result<Option<Arc<dyn LlmClient>>> {
    let build = |model: &str| -> Result<Arc<dyn LlmClient>> {
        match config.provider {
            LlmProvider::OpenAI | LlmProvider::Azure => {
                Ok(Arc::new(OpenAiClient::from_config(config, model)?))
            }
            LlmProvider::Ollama => Ok(Arc::new(OllamaClient::from_config(config, model)?)),
            LlmProvider::None => Err(AnonError::ConfigError("LLM provider disabled".to_string())),
        }
    };

    if config.provider == LlmProvider::None {
        return Ok(None);
    }

    let models = config.model_list();
    let mut clients = models
        .iter()
        .map(|m| build(m))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(provider = ?config.provider, models = ?models, "LLM client configured");

    if clients.len() == 1 {
        Ok(clients.pop())
    } else {
        Ok(Some(Arc::new(RoundRobinClient::new(clients))))
    }
}

// ============================================================================
// Tests
// ============================================================================
