//! Pipeline configuration.
//!
//! One [`PipelineConfig`] is built at startup and handed to every component
//! constructor. Sources, in increasing precedence:
//! - compiled defaults ([`crate::defaults`])
//! - a TOML file (with `${VAR}` substitution)
//! - `VAULTSORT_*` environment variables
//!
//! # Example
//!
//! ```toml
//! [vault]
//! root = "/home/me/notes"
//!
//! [provider]
//! kind = "ollama"
//! model = "qwen2.5:7b"
//!
//! [batch]
//! concurrency = 2
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::defaults;
use crate::error::{Error, Result};

/// Provider backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    Anthropic,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            _ => Err(Error::Config(format!("Invalid provider: {}", s))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Where notes live and which files count as notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub root: PathBuf,
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// Directory for cache, ledger, progress and stats files. Relative paths
    /// resolve against `root`.
    pub state_dir: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extensions: defaults::NOTE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_dirs: defaults::EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            state_dir: PathBuf::from(defaults::STATE_DIR),
        }
    }
}

/// Provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Base URL; empty means the backend default.
    pub base_url: String,
    /// Model; empty means the backend default.
    pub model: String,
    /// API key (Anthropic only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            base_url: String::new(),
            model: String::new(),
            api_key: None,
            temperature: defaults::TEMPERATURE,
            max_tokens: defaults::MAX_OUTPUT_TOKENS,
        }
    }
}

impl ProviderSettings {
    /// Base URL with the backend default applied.
    pub fn resolved_base_url(&self) -> String {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/').to_string();
        }
        match self.kind {
            ProviderKind::Ollama => defaults::OLLAMA_URL.to_string(),
            ProviderKind::Anthropic => defaults::ANTHROPIC_URL.to_string(),
        }
    }

    /// Model with the backend default applied.
    pub fn resolved_model(&self) -> String {
        if !self.model.is_empty() {
            return self.model.clone();
        }
        match self.kind {
            ProviderKind::Ollama => defaults::OLLAMA_MODEL.to_string(),
            ProviderKind::Anthropic => defaults::ANTHROPIC_MODEL.to_string(),
        }
    }
}

/// Retry, timeout, and review-routing settings for the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub call_timeout_secs: u64,
    pub timeout_increment_secs: u64,
    pub confidence_threshold: f64,
    pub max_content_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            call_timeout_secs: defaults::CALL_TIMEOUT_SECS,
            timeout_increment_secs: defaults::TIMEOUT_INCREMENT_SECS,
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            max_content_chars: defaults::MAX_CONTENT_CHARS,
        }
    }
}

impl ClassifierConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn timeout_increment(&self) -> Duration {
        Duration::from_secs(self.timeout_increment_secs)
    }
}

/// Result cache bounds and persistence cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_size_bytes: usize,
    /// Save every N puts; 0 saves only at batch end.
    pub flush_every: usize,
    pub file: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: defaults::CACHE_MAX_ENTRIES,
            max_size_bytes: defaults::CACHE_MAX_BYTES,
            flush_every: defaults::CACHE_FLUSH_EVERY,
            file: defaults::CACHE_FILE.to_string(),
        }
    }
}

/// Ledger persistence cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Save every N records; 1 saves after every record.
    pub flush_every: usize,
    pub file: String,
    pub progress_file: String,
    pub stats_file: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            flush_every: defaults::LEDGER_FLUSH_EVERY,
            file: defaults::LEDGER_FILE.to_string(),
            progress_file: defaults::PROGRESS_FILE.to_string(),
            stats_file: defaults::STATS_FILE.to_string(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub task_timeout_secs: u64,
    pub force_reprocess: bool,
    pub clear_progress_on_completion: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONCURRENCY,
            task_timeout_secs: defaults::TASK_TIMEOUT_SECS,
            force_reprocess: false,
            clear_progress_on_completion: true,
        }
    }
}

impl BatchConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Review sink location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub dir: PathBuf,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(defaults::REVIEW_DIR),
        }
    }
}

/// Note annotation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub enabled: bool,
    /// Directory of MOC files; `None` disables MOC linking.
    pub moc_dir: Option<PathBuf>,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            moc_dir: Some(PathBuf::from(defaults::MOC_DIR)),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub vault: VaultConfig,
    pub provider: ProviderSettings,
    pub classifier: ClassifierConfig,
    pub cache: CacheConfig,
    pub ledger: LedgerConfig,
    pub batch: BatchConfig,
    pub review: ReviewConfig,
    pub linker: LinkerConfig,
}

impl PipelineConfig {
    /// Load from an optional TOML file, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                info!("Loading config from: {}", p.display());
                Self::from_file(p)?
            }
            Some(p) => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )))
            }
            None => {
                debug!("No config file given, using defaults and environment");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text after `${VAR}` substitution.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);
        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Apply `VAULTSORT_*` environment overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `VAULTSORT_VAULT` | `vault.root` |
    /// | `VAULTSORT_PROVIDER` | `provider.kind` |
    /// | `VAULTSORT_BASE_URL` | `provider.base_url` |
    /// | `VAULTSORT_MODEL` | `provider.model` |
    /// | `ANTHROPIC_API_KEY` | `provider.api_key` |
    /// | `VAULTSORT_CONCURRENCY` | `batch.concurrency` |
    /// | `VAULTSORT_MAX_ATTEMPTS` | `classifier.max_attempts` |
    /// | `VAULTSORT_CONFIDENCE_THRESHOLD` | `classifier.confidence_threshold` |
    /// | `VAULTSORT_TASK_TIMEOUT_SECS` | `batch.task_timeout_secs` |
    pub fn apply_env(&mut self) {
        if let Ok(v) = env::var("VAULTSORT_VAULT") {
            self.vault.root = PathBuf::from(v);
        }
        if let Some(kind) = env::var("VAULTSORT_PROVIDER")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.provider.kind = kind;
        }
        if let Ok(v) = env::var("VAULTSORT_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Ok(v) = env::var("VAULTSORT_MODEL") {
            self.provider.model = v;
        }
        if self.provider.api_key.is_none() {
            self.provider.api_key = env::var("ANTHROPIC_API_KEY").ok();
        }
        if let Some(n) = env_parse::<usize>("VAULTSORT_CONCURRENCY") {
            self.batch.concurrency = n;
        }
        if let Some(n) = env_parse::<u32>("VAULTSORT_MAX_ATTEMPTS") {
            self.classifier.max_attempts = n;
        }
        if let Some(t) = env_parse::<f64>("VAULTSORT_CONFIDENCE_THRESHOLD") {
            self.classifier.confidence_threshold = t;
        }
        if let Some(s) = env_parse::<u64>("VAULTSORT_TASK_TIMEOUT_SECS") {
            self.batch.task_timeout_secs = s;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.vault.root.as_os_str().is_empty() {
            return Err(Error::Config("vault.root cannot be empty".to_string()));
        }
        if self.vault.extensions.is_empty() {
            return Err(Error::Config(
                "vault.extensions must list at least one extension".to_string(),
            ));
        }
        let base_url = self.provider.resolved_base_url();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "provider.base_url must start with http:// or https://, got: {}",
                base_url
            )));
        }
        if self.provider.kind == ProviderKind::Anthropic
            && self.provider.api_key.as_deref().unwrap_or("").is_empty()
        {
            return Err(Error::Config(
                "provider.api_key (or ANTHROPIC_API_KEY) is required for the anthropic provider"
                    .to_string(),
            ));
        }
        if self.classifier.max_attempts == 0 {
            return Err(Error::Config(
                "classifier.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.confidence_threshold) {
            return Err(Error::Config(format!(
                "classifier.confidence_threshold must be within [0, 1], got {}",
                self.classifier.confidence_threshold
            )));
        }
        if self.cache.max_entries == 0 || self.cache.max_size_bytes == 0 {
            return Err(Error::Config(
                "cache.max_entries and cache.max_size_bytes must be non-zero".to_string(),
            ));
        }
        if self.batch.concurrency == 0 || self.batch.concurrency > defaults::MAX_CONCURRENCY {
            return Err(Error::Config(format!(
                "batch.concurrency must be within 1..={}, got {}",
                defaults::MAX_CONCURRENCY,
                self.batch.concurrency
            )));
        }
        if self.batch.task_timeout_secs == 0 {
            return Err(Error::Config(
                "batch.task_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Replace `vault.root` with its canonical absolute form, so ledger and
    /// progress keys do not depend on how the vault was named.
    pub fn resolve_root(&mut self) -> Result<()> {
        let resolved = std::fs::canonicalize(&self.vault.root).map_err(|e| {
            Error::Config(format!(
                "Cannot resolve vault root {}: {}",
                self.vault.root.display(),
                e
            ))
        })?;
        if !resolved.is_dir() {
            return Err(Error::Config(format!(
                "Vault root is not a directory: {}",
                resolved.display()
            )));
        }
        self.vault.root = resolved;
        Ok(())
    }

    /// Resolve a path against the vault root unless it is absolute.
    pub fn vault_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.vault.root.join(path)
        }
    }

    /// Absolute state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.vault_path(&self.vault.state_dir)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.state_dir().join(&self.cache.file)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir().join(&self.ledger.file)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.state_dir().join(&self.ledger.progress_file)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.state_dir().join(&self.ledger.stats_file)
    }

    pub fn review_dir(&self) -> PathBuf {
        self.vault_path(&self.review.dir)
    }

    pub fn moc_dir(&self) -> Option<PathBuf> {
        self.linker.moc_dir.as_deref().map(|p| self.vault_path(p))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Replace `${VAR}` references with environment values (empty when unset).
pub fn substitute_env_vars(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
