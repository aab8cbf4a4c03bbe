//! Centralized default constants for vaultsort.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs, backends, and tests reference these constants instead of
//! repeating magic numbers.

// =============================================================================
// PROVIDERS
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default Ollama generation model.
pub const OLLAMA_MODEL: &str = "qwen2.5:7b";

/// Default Anthropic API base URL.
pub const ANTHROPIC_URL: &str = "https://api.anthropic.com";

/// Default Anthropic model.
pub const ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

/// Anthropic API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Sampling temperature for classification requests.
pub const TEMPERATURE: f32 = 0.2;

/// Output token budget for one classification.
pub const MAX_OUTPUT_TOKENS: u32 = 1024;

/// Provider calls slower than this are logged with `slow = true`.
pub const SLOW_CALL_MS: u64 = 30_000;

/// Timeout for provider health checks in seconds.
pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// CLASSIFIER
// =============================================================================

/// Total attempts per classification (first call plus retries).
pub const MAX_ATTEMPTS: u32 = 3;

/// Base backoff between attempts in milliseconds; doubles each attempt.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Per-call timeout for the first attempt in seconds.
pub const CALL_TIMEOUT_SECS: u64 = 60;

/// Added to the per-call timeout on each retry, in seconds.
pub const TIMEOUT_INCREMENT_SECS: u64 = 30;

/// Results below this confidence are routed to manual review.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Maximum characters of note content forwarded to the provider.
pub const MAX_CONTENT_CHARS: usize = 12_000;

// =============================================================================
// CACHE
// =============================================================================

/// Maximum number of cached classification results.
pub const CACHE_MAX_ENTRIES: usize = 5_000;

/// Maximum serialized size of the cache in bytes (16 MiB).
pub const CACHE_MAX_BYTES: usize = 16 * 1024 * 1024;

/// Save the cache every N puts (0 = only at batch end).
pub const CACHE_FLUSH_EVERY: usize = 0;

/// Default cache file name inside the state directory.
pub const CACHE_FILE: &str = "cache.json";

// =============================================================================
// LEDGER / PROGRESS
// =============================================================================

/// Save the ledger every N records (1 = after every record).
pub const LEDGER_FLUSH_EVERY: usize = 1;

/// Default ledger file name inside the state directory.
pub const LEDGER_FILE: &str = "ledger.json";

/// Default progress file name inside the state directory.
pub const PROGRESS_FILE: &str = "progress.json";

/// Default run-stats file name inside the state directory.
pub const STATS_FILE: &str = "stats.json";

/// Default state directory, relative to the vault root.
pub const STATE_DIR: &str = ".vaultsort";

// =============================================================================
// BATCH
// =============================================================================

/// Default worker pool size (1 = fully sequential).
pub const CONCURRENCY: usize = 1;

/// Hard ceiling on the worker pool size.
pub const MAX_CONCURRENCY: usize = 32;

/// Per-task wall-clock budget in seconds, covering all retries.
pub const TASK_TIMEOUT_SECS: u64 = 300;

/// Batch event broadcast channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// VAULT
// =============================================================================

/// File extensions treated as notes.
pub const NOTE_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Directories never scanned.
pub const EXCLUDED_DIRS: &[&str] = &[".obsidian", ".trash", ".git", STATE_DIR];

/// Default review directory, relative to the vault root.
pub const REVIEW_DIR: &str = "_review";

/// Default MOC directory, relative to the vault root.
pub const MOC_DIR: &str = "MOCs";
