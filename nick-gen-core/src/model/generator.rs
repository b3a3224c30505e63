use std::collections::{BTreeMap, HashSet};

use log::{debug, info, warn};
use rand::Rng;

use super::filter::{FilterChain, FilterStats, StyleFilterConfig};
use super::sampler;
use super::tags::TagPolicy;
use super::template::Template;
use super::word_root::RootMap;

/// Template used when a style does not configure any.
pub const DEFAULT_TEMPLATE: &str = "{A}{B}";

/// Everything the generator needs to know about a style.
///
/// Built by `ConfigManager::style_rules`, or by hand in tests and demos.
#[derive(Clone, Debug)]
pub struct StyleRules {
	pub style: String,
	pub templates: Vec<String>,
	pub filter: StyleFilterConfig,
	pub tags: TagPolicy,
}

impl StyleRules {
	/// Rules with default filters and no tag vocabulary.
	pub fn new(style: impl Into<String>, templates: Vec<String>) -> Self {
		Self { style: style.into(), templates, filter: StyleFilterConfig::default(), tags: TagPolicy::default() }
	}

	/// Parsed templates, falling back to `DEFAULT_TEMPLATE` when none is configured.
	pub fn parsed_templates(&self) -> Vec<Template> {
		if self.templates.is_empty() {
			warn!("[{}] no template configured, using {DEFAULT_TEMPLATE}", self.style);
			return vec![Template::parse(DEFAULT_TEMPLATE)];
		}
		self.templates.iter().map(|t| Template::parse(t)).collect()
	}
}

/// Counters of one generation run, from expansion to sampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationStats {
	pub candidates: usize,
	pub filter: FilterStats,
	pub returned: usize,
}

/// Result of `NicknameGenerator::run`.
#[derive(Clone, Debug, Default)]
pub struct Generation {
	pub names: Vec<String>,
	pub stats: GenerationStats,
}

/// Word-root based nickname generator.
///
/// # Responsibilities
/// - Expand every template of a style against its roots
/// - Run the filter chain over all candidates
/// - Deduplicate, exclude known names and sample the requested amount
///
/// Missing categories and insufficient supply are normal outcomes:
/// the generator always returns a (possibly short, possibly empty) list.
#[derive(Debug, Default, Clone, Copy)]
pub struct NicknameGenerator;

impl NicknameGenerator {
	pub fn new() -> Self {
		Self
	}

	/// Generates up to `count` new nicknames.
	///
	/// # Parameters
	/// - `rules`: templates, filters and tag policy of the style.
	/// - `roots`: word roots of the style, by category.
	/// - `count`: maximum number of names to return.
	/// - `existing`: names produced by earlier runs, never returned again.
	/// - `rng`: random source of the final sample.
	pub fn run<R: Rng + ?Sized>(
		&self,
		rules: &StyleRules,
		roots: &RootMap,
		count: usize,
		existing: &HashSet<String>,
		rng: &mut R,
	) -> Generation {
		let style = rules.style.as_str();
		info!("[{style}] generating nicknames, target count: {count}");

		let templates = rules.parsed_templates();
		debug!("[{style}] using {} templates", templates.len());

		let mut candidates = Vec::new();
		for template in &templates {
			let expanded = template.expand(roots);
			debug!("[{style}] template '{}' produced {} candidates", template.source(), expanded.len());
			candidates.extend(expanded);
		}
		info!("[{style}] templates produced {} candidates", candidates.len());

		let chain = FilterChain::new(&rules.filter, &rules.tags);
		let (names, filter_stats) = chain.apply(&candidates);
		info!(
			"[{style}] {} candidates left after filtering (length: -{}, duplicate chars: -{}, forbidden: -{}, tag conflicts: -{})",
			filter_stats.accepted,
			filter_stats.length,
			filter_stats.duplicate_chars,
			filter_stats.forbidden_combination,
			filter_stats.tag_conflict
		);

		let names = sampler::finalize(names, existing, count, rng);
		if names.len() < count {
			info!("[{style}] not enough candidates, returning all {}", names.len());
		} else {
			info!("[{style}] sampled {count} nicknames");
		}

		Generation {
			stats: GenerationStats { candidates: candidates.len(), filter: filter_stats, returned: names.len() },
			names,
		}
	}

	/// Same as `run`, with the thread-local random source and without statistics.
	pub fn generate(&self, rules: &StyleRules, roots: &RootMap, count: usize, existing: &HashSet<String>) -> Vec<String> {
		self.run(rules, roots, count, existing, &mut rand::rng()).names
	}

	/// Theoretical number of candidates of every template, before filtering.
	///
	/// A template referencing a missing category counts as 0, a literal one as 1.
	pub fn estimate_combinations(&self, rules: &StyleRules, roots: &RootMap) -> BTreeMap<String, usize> {
		rules
			.parsed_templates()
			.iter()
			.map(|template| (template.source().to_owned(), template.combinations(roots)))
			.collect()
	}
}
