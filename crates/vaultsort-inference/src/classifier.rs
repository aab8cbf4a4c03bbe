//! Retrying classifier.
//!
//! Wraps a [`ClassificationProvider`] with:
//! - up to `max_attempts` attempts; a transient failure on attempt `a`
//!   (0-based) waits `backoff_base * 2^a` before the next one
//! - a hard per-call timeout of `call_timeout + a * timeout_increment`,
//!   applied to the HTTP request and enforced again around the future
//! - output recovery through [`crate::output`]
//! - the confidence gate that flags results for review
//!
//! Provider rejections and malformed output end the call immediately.
//! The classifier never touches the cache or the ledger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use vaultsort_core::{
    AuxiliaryContext, ClassificationProvider, ClassificationResult, ClassifierConfig, Error,
    PipelineConfig, Result, TaskInput,
};

use crate::output::parse_classification;
use crate::prompt::{build_request, Sampling};

/// Note handed to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyInput {
    pub title: String,
    pub content: String,
    /// Source path, for logging only.
    pub path: Option<String>,
}

impl ClassifyInput {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl From<&TaskInput> for ClassifyInput {
    fn from(input: &TaskInput) -> Self {
        Self::new(input.title(), input.text()).with_path(input.key())
    }
}

/// Successful classification plus retry bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub result: ClassificationResult,
    /// Confidence fell below the review threshold.
    pub needs_review: bool,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Backoff waits taken between attempts, in order.
    pub backoff_waits: Vec<Duration>,
}

impl Classified {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Retrying classification client.
pub struct Classifier {
    provider: Arc<dyn ClassificationProvider>,
    config: ClassifierConfig,
    sampling: Sampling,
}

impl Classifier {
    pub fn new(provider: Arc<dyn ClassificationProvider>, config: ClassifierConfig) -> Self {
        Self {
            provider,
            config,
            sampling: Sampling::default(),
        }
    }

    /// Build from the pipeline configuration, including sampling settings.
    pub fn from_config(provider: Arc<dyn ClassificationProvider>, config: &PipelineConfig) -> Self {
        Self::new(provider, config.classifier.clone()).with_sampling(Sampling {
            temperature: config.provider.temperature,
            max_tokens: config.provider.max_tokens,
        })
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.config.confidence_threshold
    }

    pub fn provider(&self) -> &Arc<dyn ClassificationProvider> {
        &self.provider
    }

    /// Wait after a transient failure on `attempt` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.config.backoff_base().saturating_mul(factor)
    }

    /// Hard timeout for `attempt` (0-based).
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        self.config.call_timeout() + self.config.timeout_increment().saturating_mul(attempt)
    }

    /// Classify one note.
    #[instrument(
        skip(self, input, context),
        fields(
            subsystem = "inference",
            component = "classifier",
            op = "classify",
            path = input.path.as_deref().unwrap_or(""),
            model = self.provider.model_name(),
        )
    )]
    pub async fn classify(
        &self,
        input: &ClassifyInput,
        context: &AuxiliaryContext,
    ) -> Result<Classified> {
        let request = build_request(input, context, self.config.max_content_chars, self.sampling);
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff_waits = Vec::new();
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let timeout = self.attempt_timeout(attempt);
            let start = Instant::now();

            let outcome = match tokio::time::timeout(timeout, self.provider.complete(&request, timeout)).await {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(timeout)),
            };

            match outcome.and_then(|raw| parse_classification(&raw)) {
                Ok(result) => {
                    let needs_review = !result.is_confident(self.config.confidence_threshold);
                    debug!(
                        attempt,
                        category = %result.category,
                        confidence = result.confidence,
                        needs_review,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Classification succeeded"
                    );
                    return Ok(Classified {
                        result,
                        needs_review,
                        attempts: attempt + 1,
                        backoff_waits,
                    });
                }
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt + 1 < max_attempts {
                        let wait = self.backoff_for(attempt);
                        warn!(
                            attempt,
                            backoff_ms = wait.as_millis() as u64,
                            error = %e,
                            "Transient provider failure, retrying"
                        );
                        backoff_waits.push(wait);
                        tokio::time::sleep(wait).await;
                    } else {
                        warn!(attempt, error = %e, "Transient provider failure, attempts exhausted");
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Classification failed without retry");
                    return Err(e);
                }
            }
        }

        Err(Error::ClassificationFailed {
            attempts: max_attempts,
            last_error,
        })
    }
}
