//! Mock classification provider for deterministic testing.
//!
//! ## Usage
//!
//! ```rust
//! use vaultsort_inference::mock::{MockProvider, MockReply};
//!
//! let provider = MockProvider::new()
//!     .with_response(r#"{"category":"Rust","confidence":0.9}"#)
//!     .with_reply_for("flaky.md", MockReply::Transient("connection reset".into()))
//!     .with_script(vec![MockReply::Hang]);
//! ```
//!
//! Reply selection, first match wins:
//! 1. the next scripted reply, if the script is not exhausted
//! 2. the first rule whose needle occurs in the prompt
//! 3. random transient failure, per the failure rate
//! 4. the default response

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use vaultsort_core::{ClassificationProvider, Error, ProviderRequest, Result};

/// Default mock response: a confident classification.
pub const DEFAULT_RESPONSE: &str = r#"{"category":"Inbox","confidence":0.9,"tags":["mock"]}"#;

/// One scripted provider behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Return this raw text.
    Respond(String),
    /// Fail with `Error::Transient`.
    Transient(String),
    /// Fail with `Error::Provider`.
    Reject(String),
    /// Never return; the caller's timeout has to fire.
    Hang,
}

impl MockReply {
    pub fn respond(text: impl Into<String>) -> Self {
        Self::Respond(text.into())
    }
}

/// One recorded `complete` call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
    pub timeout: Duration,
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
struct MockConfig {
    default_response: String,
    rules: Vec<(String, MockReply)>,
    latency: Duration,
    failure_rate: f64,
    healthy: bool,
    model: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_response: DEFAULT_RESPONSE.to_string(),
            rules: Vec::new(),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            healthy: true,
            model: "mock-model".to_string(),
        }
    }
}

/// Mock provider with scripted replies, latency, and failure injection.
#[derive(Clone, Default)]
pub struct MockProvider {
    config: Arc<MockConfig>,
    script: Arc<Mutex<VecDeque<MockReply>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default raw response.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Reply with `reply` whenever the prompt contains `needle`.
    pub fn with_reply_for(mut self, needle: impl Into<String>, reply: MockReply) -> Self {
        Arc::make_mut(&mut self.config)
            .rules
            .push((needle.into(), reply));
        self
    }

    /// Queue replies consumed in call order before any other rule applies.
    pub fn with_script(self, replies: Vec<MockReply>) -> Self {
        self.script.lock().unwrap().extend(replies);
        self
    }

    /// Simulated latency before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Probability (0.0 - 1.0) of a random transient failure.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        Arc::make_mut(&mut self.config).failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_health(mut self, healthy: bool) -> Self {
        Arc::make_mut(&mut self.config).healthy = healthy;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// Calls whose prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.prompt.contains(needle))
            .count()
    }

    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    fn should_fail(&self) -> bool {
        use rand::Rng;
        self.config.failure_rate > 0.0
            && rand::thread_rng().gen::<f64>() < self.config.failure_rate
    }

    fn select_reply(&self, prompt: &str) -> MockReply {
        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return reply;
        }
        if let Some((_, reply)) = self
            .config
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return reply.clone();
        }
        if self.should_fail() {
            return MockReply::Transient("Simulated random failure".to_string());
        }
        MockReply::Respond(self.config.default_response.clone())
    }
}

#[async_trait]
impl ClassificationProvider for MockProvider {
    async fn complete(&self, request: &ProviderRequest, timeout: Duration) -> Result<String> {
        self.call_log.lock().unwrap().push(MockCall {
            prompt: request.prompt.clone(),
            timeout,
            timestamp: Instant::now(),
        });
        let reply = self.select_reply(&request.prompt);

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        match reply {
            MockReply::Respond(text) => Ok(text),
            MockReply::Transient(msg) => Err(Error::Transient(msg)),
            MockReply::Reject(msg) => Err(Error::Provider(msg)),
            MockReply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.config.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> ProviderRequest {
        ProviderRequest {
            system: String::new(),
            prompt: prompt.to_string(),
            temperature: 0.0,
            max_tokens: 16,
            json_mode: true,
        }
    }

    #[tokio::test]
    async fn test_default_response() {
        let provider = MockProvider::new();
        let out = provider
            .complete(&request("anything"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, DEFAULT_RESPONSE);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_script_consumed_in_order() {
        let provider = MockProvider::new().with_script(vec![
            MockReply::Transient("reset".to_string()),
            MockReply::respond("second"),
        ]);
        let t = Duration::from_secs(1);
        assert!(provider.complete(&request("x"), t).await.unwrap_err().is_transient());
        assert_eq!(provider.complete(&request("x"), t).await.unwrap(), "second");
        assert_eq!(provider.complete(&request("x"), t).await.unwrap(), DEFAULT_RESPONSE);
    }

    #[tokio::test]
    async fn test_rule_matches_prompt() {
        let provider = MockProvider::new()
            .with_reply_for("secret", MockReply::Reject("forbidden".to_string()));
        let err = provider
            .complete(&request("a secret note"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(provider.calls_matching("secret"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_returns() {
        let provider = MockProvider::new().with_script(vec![MockReply::Hang]);
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            provider.complete(&request("x"), Duration::from_secs(5)),
        )
        .await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let provider = MockProvider::new().with_failure_rate(1.0);
        for _ in 0..5 {
            assert!(provider
                .complete(&request("x"), Duration::from_secs(1))
                .await
                .is_err());
        }
    }

    #[tokio::test]
    async fn test_health_and_identity() {
        let provider = MockProvider::new().with_health(false).with_model("m1");
        assert!(!provider.health_check().await.unwrap());
        assert_eq!(provider.name(), "mock");
        assert_eq!(provider.model_name(), "m1");
    }
}
