//! Domain models shared across vaultsort crates.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

// =============================================================================
// FINGERPRINT
// =============================================================================

/// Deterministic content digest of a note's raw bytes.
///
/// Used both as the result-cache key and as the change-detection value in the
/// ledger. Two inputs with identical fingerprints are treated as identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Prefix identifying the digest algorithm.
    pub const PREFIX: &'static str = "sha256:";

    /// Compute the fingerprint of raw content.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(format!("{}{}", Self::PREFIX, hex::encode(hasher.finalize())))
    }

    /// Wrap an already-computed digest string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        let hex = self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0);
        &hex[..hex.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Structured payload produced by the classification provider.
///
/// Immutable once produced; the result cache stores it by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Category (MOC) label.
    pub category: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Free-form explanation from the model.
    #[serde(default)]
    pub rationale: String,
    /// Suggested tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Suggested related notes (titles).
    #[serde(default)]
    pub related: Vec<String>,
}

impl ClassificationResult {
    /// Create a result, clamping confidence into [0, 1].
    pub fn new(category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            confidence: clamp_confidence(confidence),
            rationale: String::new(),
            tags: Vec::new(),
            related: Vec::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_related(mut self, related: Vec<String>) -> Self {
        self.related = related;
        self
    }

    /// Whether this result clears the given review threshold.
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Clamp a confidence score into [0, 1]; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Already-known vault items used to bias the provider's output.
///
/// The classifier forwards these into the prompt and does not interpret them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryContext {
    /// Existing MOC categories.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Candidate related-note titles.
    #[serde(default)]
    pub candidate_related: Vec<String>,
    /// Tag vocabulary already in use.
    #[serde(default)]
    pub known_tags: Vec<String>,
}

impl AuxiliaryContext {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.candidate_related.is_empty() && self.known_tags.is_empty()
    }
}

// =============================================================================
// LEDGER
// =============================================================================

/// Ledger record for one tracked note path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub path: String,
    pub fingerprint: Fingerprint,
    pub last_processed_at: DateTime<Utc>,
    pub succeeded: bool,
    pub size_bytes: u64,
}

// =============================================================================
// TASKS
// =============================================================================

/// One unit of work handed to the batch coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    /// Absolute path of the note.
    pub path: PathBuf,
    /// Raw note bytes.
    pub content: Vec<u8>,
}

impl TaskInput {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Ledger/progress key for this input.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Note title (file stem).
    pub fn title(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Content decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.content)
    }
}

/// Stage of a task's state machine.
///
/// ```text
/// Pending ─► Analyzing ─► Linking ─► Completed
///    │           │           │
///    │           └─► Failed ◄┘
///    └──────────────────────────► Completed   (unchanged / cache hit)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Pending,
    Analyzing,
    Linking,
    Completed,
    Failed,
}

impl TaskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Pending => "pending",
            TaskStage::Analyzing => "analyzing",
            TaskStage::Linking => "linking",
            TaskStage::Completed => "completed",
            TaskStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStage::Completed | TaskStage::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: TaskStage) -> bool {
        use TaskStage::*;
        matches!(
            (self, next),
            (Pending, Analyzing)
                | (Pending, Completed)
                | (Analyzing, Linking)
                | (Analyzing, Failed)
                | (Linking, Completed)
                | (Linking, Failed)
        )
    }

    /// Validate a transition, returning the target stage.
    pub fn transition(self, next: TaskStage) -> Result<TaskStage> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted stage of one task, used for crash-resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub stage: TaskStage,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(stage: TaskStage) -> Self {
        Self {
            stage,
            updated_at: Utc::now(),
            error: None,
        }
    }
}

// =============================================================================
// REVIEW
// =============================================================================

/// Item routed to the human-review sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub path: String,
    pub result: ClassificationResult,
    pub confidence: f64,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

impl ReviewItem {
    /// Build a low-confidence review item.
    pub fn low_confidence(path: impl Into<String>, result: ClassificationResult, threshold: f64) -> Self {
        let confidence = result.confidence;
        Self {
            path: path.into(),
            reason: format!(
                "confidence {:.2} below review threshold {:.2}",
                confidence, threshold
            ),
            result,
            confidence,
            queued_at: Utc::now(),
        }
    }
}
