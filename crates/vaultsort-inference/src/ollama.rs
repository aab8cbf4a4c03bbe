//! Ollama classification provider (`/api/chat`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use vaultsort_core::{
    defaults, ClassificationProvider, Error, ProviderRequest, ProviderSettings, Result,
};

use crate::provider::{classify_status, http_client, map_send_error};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = defaults::OLLAMA_URL;

/// Default classification model.
pub const DEFAULT_MODEL: &str = defaults::OLLAMA_MODEL;

/// Ollama classification provider.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    /// Create a provider for `base_url` and `model`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        info!("Initializing Ollama provider: url={}, model={}", base_url, model);
        Ok(Self {
            client: http_client()?,
            base_url,
            model,
        })
    }

    /// Create from provider settings, applying Ollama defaults.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        Self::new(settings.resolved_base_url(), settings.resolved_model())
    }

    /// Create from environment variables (`OLLAMA_BASE`, `OLLAMA_MODEL`).
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(base_url, model)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_chat_request(&self, request: &ProviderRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: request.system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let format = request.json_mode.then(|| serde_json::json!("json"));
        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            // Reasoning output would break format enforcement.
            think: format.as_ref().map(|_| false),
            format,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

/// Chat API message for `/api/chat`.
#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    /// Set to `"json"` to constrain output to valid JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    /// Disable reasoning for models that support it (qwen3, gpt-oss).
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
    options: ChatOptions,
}

/// Response from `/api/chat` with `stream: false`.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl ClassificationProvider for OllamaProvider {
    #[instrument(skip(self, request), fields(subsystem = "inference", component = "ollama", op = "complete", model = %self.model, prompt_len = request.prompt.len()))]
    async fn complete(&self, request: &ProviderRequest, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        debug!(json_format = request.json_mode, timeout_ms = timeout.as_millis() as u64, "Sending chat request");

        let body = self.build_chat_request(request);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error("Ollama", timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, &body));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse Ollama response: {}", e)))?;

        let content = result.message.content;
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            duration_ms = elapsed,
            "Chat request complete"
        );
        if elapsed > defaults::SLOW_CALL_MS {
            warn!(
                duration_ms = elapsed,
                prompt_len = request.prompt.len(),
                slow = true,
                "Slow classification call"
            );
        }
        Ok(content)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(defaults::HEALTH_CHECK_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama health check passed");
                Ok(true)
            }
            Ok(resp) => {
                warn!("Ollama health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Ollama health check error: {}", e);
                Ok(false)
            }
        }
    }
}
