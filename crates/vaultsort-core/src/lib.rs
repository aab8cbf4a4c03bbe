//! # vaultsort-core
//!
//! Core types, traits, and configuration for the vaultsort note classifier.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the store, inference, and jobs crates depend on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{
    BatchConfig, CacheConfig, ClassifierConfig, LedgerConfig, LinkerConfig, PipelineConfig,
    ProviderKind, ProviderSettings, ReviewConfig, VaultConfig,
};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
