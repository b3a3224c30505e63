//! Word-root combinatorial generation.
//!
//! This module covers the deterministic part of nickname generation:
//! - Word roots and their normalization (`word_root`)
//! - Template parsing and Cartesian expansion (`template`)
//! - Tag conflict checks (`tags`)
//! - The filter chain (`filter`)
//! - Deduplication and bounded sampling (`sampler`)
//! - The generator tying them together (`generator`)

/// High-level generator: expand, filter, deduplicate, sample.
pub mod generator;

/// Word roots, root maps and normalization of legacy entries.
pub mod word_root;

/// Template parsing into literal/placeholder tokens and expansion.
pub mod template;

/// Tag conflict rules and the per-style tag policy.
pub mod tags;

/// Length, repetition, forbidden substring and tag conflict predicates.
pub mod filter;

/// Deduplication, exclusion and sampling of the final names.
pub mod sampler;
