//! Word-root based nickname generation library.
//!
//! This crate provides a complete nickname generation system including:
//! - Template expansion over categorized word roots, with tag constraints
//! - A filter chain (length, duplicate characters, forbidden combinations, tag conflicts)
//! - Deduplication, exclusion of known names and random sampling
//! - Word root supply per style: in-memory cache, YAML files, LLM generation
//! - YAML configuration with hot reload, plain-text name storage
//!
//! The generation core (`model`) never fails: missing categories or a
//! short supply of candidates only yield fewer names. Errors come from the
//! I/O edges and are reported through [`error::Error`].

/// Core generation logic: word roots, templates, tags, filters, sampling.
pub mod model;

/// Word root cache, persistence and generation.
pub mod roots;

/// YAML configuration directory (`config.yaml`, `styles.yaml`, `prompts.yaml`).
pub mod config;

/// Error types.
pub mod error;

/// Chat-completions client used to generate word roots.
pub mod llm;

/// Generated names storage.
pub mod storage;

/// End-to-end generation for a configured style.
pub mod pipeline;

/// I/O utilities (file loading, path helpers).
///
/// Not exposed
pub(crate) mod io;

pub use error::{Error, Result};
pub use model::generator::{NicknameGenerator, StyleRules};
pub use pipeline::{GenerationReport, NicknamePipeline};
