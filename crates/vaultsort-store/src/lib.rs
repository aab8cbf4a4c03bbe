//! # vaultsort-store
//!
//! In-process state for the classification pipeline:
//! - [`ResultCache`]: bounded LRU cache of classification results keyed by fingerprint
//! - [`ChangeTracker`]: persisted path → fingerprint ledger for incremental runs
//! - [`ProgressStore`]: persisted per-task stage for crash-resume
//!
//! Each store guards its state with its own mutex. No store lock is ever held
//! while another store is locked, and none is held across a provider call.

pub mod cache;
pub mod ledger;
pub mod persist;
pub mod progress;

pub use cache::{CacheStats, ResultCache};
pub use ledger::{ChangeTracker, TrackerStats};
pub use progress::ProgressStore;

// Re-export core types
pub use vaultsort_core::*;
