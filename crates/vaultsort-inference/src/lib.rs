//! # vaultsort-inference
//!
//! Classification providers and the retrying classifier for vaultsort.
//!
//! This crate provides:
//! - Ollama provider (default, feature `ollama`)
//! - Anthropic Messages API provider (default, feature `anthropic`)
//! - Provider construction from [`ProviderSettings`](vaultsort_core::ProviderSettings)
//! - Prompt assembly from note content and auxiliary vault context
//! - Recovery of a classification payload from free-form model output
//! - [`Classifier`]: bounded retry with exponential backoff, growing per-call
//!   timeouts, and confidence gating
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama provider
//! - `anthropic` (default): Enable Anthropic provider
//! - `mock`: Enable [`mock::MockProvider`] outside this crate's tests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vaultsort_core::{AuxiliaryContext, ClassifierConfig, ProviderSettings};
//! use vaultsort_inference::{build_provider, Classifier, ClassifyInput};
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = build_provider(&ProviderSettings::default()).unwrap();
//!     let classifier = Classifier::new(provider, ClassifierConfig::default());
//!     let input = ClassifyInput::new("Ownership", "Every value has a single owner.");
//!     let classified = classifier
//!         .classify(&input, &AuxiliaryContext::default())
//!         .await
//!         .unwrap();
//!     println!("{}", classified.result.category);
//! }
//! ```

pub mod classifier;
pub mod output;
pub mod prompt;
pub mod provider;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use vaultsort_core::*;

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;

pub use classifier::{Classified, Classifier, ClassifyInput};
pub use output::parse_classification;
pub use provider::build_provider;
