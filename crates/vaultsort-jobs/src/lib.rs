//! # vaultsort-jobs
//!
//! Batch processing for the vaultsort note classifier.
//!
//! This crate provides:
//! - [`BatchCoordinator`]: bounded worker pool with per-task timeouts,
//!   incremental skipping, cache lookups, and crash-resume
//! - Progress events via a broadcast channel and a graceful [`StopHandle`]
//! - [`RunStats`] counters persisted after every task
//! - Review sinks for low-confidence results
//! - Note linkers that annotate frontmatter and maintain MOC files
//! - Vault enumeration
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vaultsort_core::PipelineConfig;
//! use vaultsort_inference::{build_provider, Classifier};
//! use vaultsort_jobs::{scan_vault, BatchCoordinator, VaultFilter};
//!
//! let config = PipelineConfig::load(None)?;
//! let provider = build_provider(&config.provider)?;
//! let classifier = Arc::new(Classifier::from_config(provider, &config));
//! let coordinator = BatchCoordinator::builder(&config, classifier).build();
//!
//! let inputs = scan_vault(&config.vault.root, &VaultFilter::from_config(&config))?;
//! let report = coordinator.run(inputs).await?;
//! println!("processed {}", report.stats.processed);
//! ```

pub mod coordinator;
pub mod linker;
pub mod review;
pub mod stats;
pub mod vault;

pub use coordinator::{
    BatchCoordinator, BatchCoordinatorBuilder, BatchEvent, RunReport, SkipReason, StopHandle,
};
pub use linker::{FrontmatterLinker, NoopLinker};
pub use review::{DirectoryReviewSink, MemoryReviewSink};
pub use stats::{FailedTask, RunStats, RunStatsSnapshot};
pub use vault::{collect_context, list_note_paths, scan_vault, VaultFilter};

// Re-export core types
pub use vaultsort_core::*;
