//! Structured logging field name constants for vaultsort.
//!
//! All crates use these constants for consistent structured logging fields,
//! so a JSON log stream can be filtered by the same keys regardless of which
//! subsystem emitted the event.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded run, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (batch start/finish), task completions |
//! | DEBUG | Decision points (skip, cache hit, retry), config choices |
//! | TRACE | Per-entry iteration (evictions, ledger lookups) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID for one batch run.
/// Format: UUIDv7 (time-ordered).
pub const RUN_ID: &str = "run_id";

/// Subsystem originating the log event.
/// Values: "store", "inference", "jobs", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "result_cache", "ledger", "classifier", "ollama", "coordinator"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "classify", "complete", "record", "put"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Note path being operated on.
pub const PATH: &str = "path";

/// Content fingerprint of the note.
pub const FINGERPRINT: &str = "fingerprint";

/// Task stage after a transition.
pub const STAGE: &str = "stage";

/// Category (MOC) assigned by classification.
pub const CATEGORY: &str = "category";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Zero-based attempt number within a retry loop.
pub const ATTEMPT: &str = "attempt";

/// Backoff wait in milliseconds before the next attempt.
pub const BACKOFF_MS: &str = "backoff_ms";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

/// Confidence score of a classification.
pub const CONFIDENCE: &str = "confidence";

/// Number of inputs in a batch.
pub const INPUT_COUNT: &str = "input_count";

// ─── Store fields ──────────────────────────────────────────────────────────

/// Current number of cache entries.
pub const CACHE_ENTRIES: &str = "cache_entries";

/// Current cache size in bytes.
pub const CACHE_BYTES: &str = "cache_bytes";

/// Number of ledger records.
pub const TRACKED_COUNT: &str = "tracked_count";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

/// Provider name ("ollama", "anthropic").
pub const PROVIDER: &str = "provider";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";

/// Every field name above, for log-schema checks.
pub const ALL_FIELDS: &[&str] = &[
    RUN_ID,
    SUBSYSTEM,
    COMPONENT,
    OPERATION,
    PATH,
    FINGERPRINT,
    STAGE,
    CATEGORY,
    DURATION_MS,
    ATTEMPT,
    BACKOFF_MS,
    PROMPT_LEN,
    RESPONSE_LEN,
    CONFIDENCE,
    INPUT_COUNT,
    CACHE_ENTRIES,
    CACHE_BYTES,
    TRACKED_COUNT,
    MODEL,
    PROVIDER,
    SUCCESS,
    ERROR_MSG,
    SLOW,
];
