//! Anthropic Messages API classification provider (`/v1/messages`).
//!
//! Non-streaming: the classifier needs the whole payload before it can
//! parse anything, so one request returns one message.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use vaultsort_core::{
    defaults, ClassificationProvider, Error, ProviderRequest, ProviderSettings, Result,
};

use crate::provider::{classify_status, http_client, map_send_error};

/// Default Anthropic API base URL.
pub const DEFAULT_ANTHROPIC_URL: &str = defaults::ANTHROPIC_URL;

/// Default classification model.
pub const DEFAULT_MODEL: &str = defaults::ANTHROPIC_MODEL;

/// `anthropic-version` header value.
pub const API_VERSION: &str = defaults::ANTHROPIC_VERSION;

/// Anthropic classification provider.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl AnthropicProvider {
    /// Create a provider. The API key must be non-empty.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Config(
                "Anthropic provider requires an API key".to_string(),
            ));
        }
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        info!("Initializing Anthropic provider: url={}, model={}", base_url, model);
        Ok(Self {
            client: http_client()?,
            base_url,
            model,
            api_key,
        })
    }

    /// Create from provider settings, applying Anthropic defaults.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        Self::new(
            settings.resolved_base_url(),
            settings.resolved_model(),
            settings.api_key.clone().unwrap_or_default(),
        )
    }

    /// Create from `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`, and `ANTHROPIC_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::Config("ANTHROPIC_API_KEY not set".to_string()))?;
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_ANTHROPIC_URL.to_string());
        let model =
            std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(base_url, model, api_key)
    }

    fn build_messages_request(&self, request: &ProviderRequest) -> MessagesRequest {
        let mut system = request.system.clone();
        if request.json_mode {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str("Respond with a single JSON object and nothing else.");
        }
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system: (!system.is_empty()).then_some(system),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: Some(request.temperature),
            stream: false,
        }
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
    }
}

/// Request body for the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    /// Concatenated text blocks.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[async_trait]
impl ClassificationProvider for AnthropicProvider {
    #[instrument(skip(self, request), fields(subsystem = "inference", component = "anthropic", op = "complete", model = %self.model, prompt_len = request.prompt.len()))]
    async fn complete(&self, request: &ProviderRequest, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        let body = self.build_messages_request(request);

        let response = self
            .build_request("/v1/messages")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error("Anthropic", timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("Anthropic", status, &text));
        }

        let result: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse Anthropic response: {}", e)))?;

        if result.stop_reason.as_deref() == Some("max_tokens") {
            warn!(max_tokens = request.max_tokens, "Response truncated at token budget");
        }

        let content = result.text();
        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            duration_ms = elapsed,
            "Messages request complete"
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
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    /// Lists models; any successful response means the key and endpoint work.
    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(Duration::from_secs(defaults::HEALTH_CHECK_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("Anthropic health check passed");
                Ok(true)
            }
            Ok(resp) => {
                warn!("Anthropic health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Anthropic health check error: {}", e);
                Ok(false)
            }
        }
    }
}
