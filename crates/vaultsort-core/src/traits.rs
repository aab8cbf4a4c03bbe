//! Trait seams between the pipeline and its external collaborators.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ClassificationResult, Fingerprint, ReviewItem, TaskInput};

// =============================================================================
// PROVIDER TRAITS
// =============================================================================

/// Opaque request sent to a classification provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// System instructions.
    pub system: String,
    /// User prompt carrying the note and its context.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: u32,
    /// Ask the backend to constrain output to JSON when it supports it.
    pub json_mode: bool,
}

/// Backend that turns a prompt into raw model text.
///
/// Implementations map transport failures to `Error::Transient` and request
/// rejections to `Error::Provider`; parsing the text is the classifier's job.
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    /// Send one request, aborting it once `timeout` elapses.
    async fn complete(&self, request: &ProviderRequest, timeout: Duration) -> Result<String>;

    /// Provider identifier ("ollama", "anthropic", ...).
    fn name(&self) -> &str;

    /// Model used for generation.
    fn model_name(&self) -> &str;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// SINK TRAITS
// =============================================================================

/// Append-only destination for low-confidence classifications.
#[async_trait]
pub trait ReviewSink: Send + Sync {
    async fn submit(&self, item: ReviewItem) -> Result<()>;
}

/// Writes a classification back into the vault.
#[async_trait]
pub trait NoteLinker: Send + Sync {
    /// Annotate the note and link it into the taxonomy.
    ///
    /// Returns the fingerprint of the rewritten note when the file content
    /// changed, so the ledger records what is now on disk.
    async fn link(&self, input: &TaskInput, result: &ClassificationResult)
        -> Result<Option<Fingerprint>>;
}
