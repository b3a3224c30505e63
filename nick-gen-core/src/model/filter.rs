use std::sync::mpsc;
use std::thread;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::tags::TagPolicy;
use super::template::Candidate;

/// Below this many candidates the chain runs on the calling thread.
const PARALLEL_THRESHOLD: usize = 50_000;

/// Filtering parameters of a style, after falling back to global defaults.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StyleFilterConfig {
	pub forbid_duplicate_chars: bool,
	/// Each inner list is concatenated into one forbidden substring.
	pub forbidden_combinations: Vec<Vec<String>>,
	pub length_min: usize,
	pub length_max: usize,
}

impl Default for StyleFilterConfig {
	fn default() -> Self {
		Self { forbid_duplicate_chars: true, forbidden_combinations: Vec::new(), length_min: 2, length_max: 6 }
	}
}

/// Why a candidate was discarded. Predicates run in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
	Length,
	DuplicateChars,
	ForbiddenCombination,
	TagConflict,
}

/// Per-predicate counters of one filter run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
	pub accepted: usize,
	pub length: usize,
	pub duplicate_chars: usize,
	pub forbidden_combination: usize,
	pub tag_conflict: usize,
}

impl FilterStats {
	fn record(&mut self, verdict: Result<(), Rejection>) {
		match verdict {
			Ok(()) => self.accepted += 1,
			Err(Rejection::Length) => self.length += 1,
			Err(Rejection::DuplicateChars) => self.duplicate_chars += 1,
			Err(Rejection::ForbiddenCombination) => self.forbidden_combination += 1,
			Err(Rejection::TagConflict) => self.tag_conflict += 1,
		}
	}

	fn merge(&mut self, other: &Self) {
		self.accepted += other.accepted;
		self.length += other.length;
		self.duplicate_chars += other.duplicate_chars;
		self.forbidden_combination += other.forbidden_combination;
		self.tag_conflict += other.tag_conflict;
	}

	pub fn rejected(&self) -> usize {
		self.length + self.duplicate_chars + self.forbidden_combination + self.tag_conflict
	}
}

/// Sequence of independent predicates applied to every candidate.
///
/// # Responsibilities
/// - Length bounds, counted in `char`s (CJK names are multi-byte)
/// - Adjacent repeated characters (when the style forbids them)
/// - Forbidden substrings
/// - Tag conflicts (only for styles with a tag vocabulary, only for tagged candidates)
///
/// A candidate survives only if every predicate passes; the first failure
/// discards it. The chain is pure.
#[derive(Clone, Debug)]
pub struct FilterChain<'a> {
	config: &'a StyleFilterConfig,
	tags: &'a TagPolicy,
	forbidden: Vec<String>,
}

impl<'a> FilterChain<'a> {
	pub fn new(config: &'a StyleFilterConfig, tags: &'a TagPolicy) -> Self {
		let forbidden = config
			.forbidden_combinations
			.iter()
			.filter_map(|parts| {
				let joined = parts.concat();
				if joined.is_empty() {
					// An empty needle would match every name
					warn!("ignoring empty forbidden combination");
					None
				} else {
					Some(joined)
				}
			})
			.collect();
		Self { config, tags, forbidden }
	}

	/// Runs every predicate on one candidate, stopping at the first failure.
	pub fn check(&self, candidate: &Candidate) -> Result<(), Rejection> {
		let name = candidate.name.as_str();

		let length = name.chars().count();
		if length < self.config.length_min || length > self.config.length_max {
			return Err(Rejection::Length);
		}

		if self.config.forbid_duplicate_chars && has_adjacent_duplicate(name) {
			return Err(Rejection::DuplicateChars);
		}

		if self.forbidden.iter().any(|needle| name.contains(needle.as_str())) {
			return Err(Rejection::ForbiddenCombination);
		}

		if self.tags.has_tag_system() && !candidate.tags.is_empty() && !self.tags.is_compatible(&candidate.tags) {
			return Err(Rejection::TagConflict);
		}

		Ok(())
	}

	fn apply_serial(&self, candidates: &[Candidate]) -> (Vec<String>, FilterStats) {
		let mut stats = FilterStats::default();
		let mut names = Vec::new();
		for candidate in candidates {
			let verdict = self.check(candidate);
			if verdict.is_ok() {
				names.push(candidate.name.clone());
			}
			stats.record(verdict);
		}
		(names, stats)
	}

	/// Filters candidates and returns the surviving names with statistics.
	///
	/// # Notes
	/// - Large inputs are split into chunks evaluated on scoped threads;
	///   the relative order of survivors across chunks is then unspecified.
	/// - Tag provenance is dropped: only names are returned.
	pub fn apply(&self, candidates: &[Candidate]) -> (Vec<String>, FilterStats) {
		if candidates.len() < PARALLEL_THRESHOLD {
			return self.apply_serial(candidates);
		}

		let chunks = num_cpus::get().max(1);
		let chunk_size = candidates.len().div_ceil(chunks);
		debug!("filtering {} candidates in chunks of {chunk_size}", candidates.len());

		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for chunk in candidates.chunks(chunk_size) {
				let tx = tx.clone();
				scope.spawn(move || {
					// The receiver outlives the scope, sending cannot fail
					let _ = tx.send(self.apply_serial(chunk));
				});
			}
		});
		drop(tx);

		let mut names = Vec::new();
		let mut stats = FilterStats::default();
		for (partial_names, partial_stats) in rx.iter() {
			names.extend(partial_names);
			stats.merge(&partial_stats);
		}
		(names, stats)
	}
}

/// Filters `candidates` with the given style configuration and tag policy.
pub fn filter(candidates: &[Candidate], config: &StyleFilterConfig, tags: &TagPolicy) -> Vec<String> {
	FilterChain::new(config, tags).apply(candidates).0
}

/// Returns `true` if two consecutive characters are identical.
pub fn has_adjacent_duplicate(name: &str) -> bool {
	let mut chars = name.chars();
	let Some(mut previous) = chars.next() else { return false };
	for c in chars {
		if c == previous {
			return true;
		}
		previous = c;
	}
	false
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use super::*;

	fn candidate(name: &str, tags: &[&str]) -> Candidate {
		Candidate { name: name.to_owned(), tags: tags.iter().map(|t| t.to_string()).collect() }
	}

	fn config(min: usize, max: usize) -> StyleFilterConfig {
		StyleFilterConfig { forbid_duplicate_chars: true, forbidden_combinations: Vec::new(), length_min: min, length_max: max }
	}

	#[test]
	fn length_bounds_are_inclusive_and_count_chars() {
		let config = config(2, 4);
		let policy = TagPolicy::default();
		let chain = FilterChain::new(&config, &policy);

		assert_eq!(chain.check(&candidate("云", &[])), Err(Rejection::Length));
		assert_eq!(chain.check(&candidate("云风", &[])), Ok(()));
		assert_eq!(chain.check(&candidate("云风月雪", &[])), Ok(()));
		assert_eq!(chain.check(&candidate("云风月雪花", &[])), Err(Rejection::Length));
	}

	#[test]
	fn adjacent_duplicates_are_rejected() {
		assert!(has_adjacent_duplicate("云云风"));
		assert!(!has_adjacent_duplicate("云风云"));
		assert!(!has_adjacent_duplicate(""));

		let config = config(2, 6);
		let policy = TagPolicy::default();
		let chain = FilterChain::new(&config, &policy);
		assert_eq!(chain.check(&candidate("云云风", &[])), Err(Rejection::DuplicateChars));
		assert_eq!(chain.check(&candidate("云风云", &[])), Ok(()));
	}

	#[test]
	fn duplicate_check_can_be_disabled() {
		let mut config = config(2, 6);
		config.forbid_duplicate_chars = false;
		let policy = TagPolicy::default();
		assert_eq!(FilterChain::new(&config, &policy).check(&candidate("云云风", &[])), Ok(()));
	}

	#[test]
	fn forbidden_combinations_match_anywhere() {
		let mut config = config(2, 6);
		config.forbidden_combinations = vec![vec!["魔".into(), "法".into()], vec![]];
		let policy = TagPolicy::default();
		let chain = FilterChain::new(&config, &policy);

		assert_eq!(chain.check(&candidate("暗魔法师", &[])), Err(Rejection::ForbiddenCombination));
		assert_eq!(chain.check(&candidate("魔师法", &[])), Ok(()));
	}

	#[test]
	fn tag_conflicts_only_apply_with_a_vocabulary() {
		let config = config(2, 6);
		let conflicts = [vec!["冷色调".to_string(), "暖色调".to_string()]];
		let policy = TagPolicy::from_config(vec!["冷色调".into(), "暖色调".into()], &conflicts);
		let chain = FilterChain::new(&config, &policy);

		assert_eq!(chain.check(&candidate("云日", &["冷色调", "暖色调"])), Err(Rejection::TagConflict));
		assert_eq!(chain.check(&candidate("云月", &["冷色调"])), Ok(()));

		// Same rules, no declared vocabulary: tag checks are skipped
		let unconfigured = TagPolicy::from_config(Vec::new(), &conflicts);
		let chain = FilterChain::new(&config, &unconfigured);
		assert_eq!(chain.check(&candidate("云日", &["冷色调", "暖色调"])), Ok(()));
	}

	#[test]
	fn first_failing_predicate_is_reported() {
		let mut config = config(2, 3);
		config.forbidden_combinations = vec![vec!["魔".into()]];
		let policy = TagPolicy::default();
		let chain = FilterChain::new(&config, &policy);
		// Too long, has a repeat and a forbidden char: length wins
		assert_eq!(chain.check(&candidate("魔魔魔魔", &[])), Err(Rejection::Length));
		assert_eq!(chain.check(&candidate("魔魔", &[])), Err(Rejection::DuplicateChars));
	}

	#[test]
	fn stats_account_for_every_candidate() {
		let mut config = config(2, 3);
		config.forbidden_combinations = vec![vec!["魔".into(), "法".into()]];
		let policy = TagPolicy::default();
		let candidates = vec![
			candidate("云风", &[]),
			candidate("云", &[]),
			candidate("云云", &[]),
			candidate("魔法", &[]),
		];
		let (names, stats) = FilterChain::new(&config, &policy).apply(&candidates);

		assert_eq!(names, vec!["云风".to_string()]);
		assert_eq!(stats.accepted, 1);
		assert_eq!(stats.rejected(), 3);
	}

	#[test]
	fn large_inputs_give_the_same_survivors() {
		let config = config(2, 2);
		let policy = TagPolicy::default();
		let alphabet: Vec<char> = "云月风花雪山水林".chars().collect();
		let mut candidates = Vec::new();
		while candidates.len() < PARALLEL_THRESHOLD + 10 {
			let i = candidates.len();
			let name: String = [alphabet[i % 8], alphabet[(i / 8) % 8]].iter().collect();
			candidates.push(candidate(&name, &[]));
		}

		let chain = FilterChain::new(&config, &policy);
		let (parallel, stats) = chain.apply(&candidates);
		let (serial, _) = chain.apply_serial(&candidates);

		let parallel: BTreeSet<String> = parallel.into_iter().collect();
		let serial: BTreeSet<String> = serial.into_iter().collect();
		assert_eq!(parallel, serial);
		assert_eq!(stats.accepted + stats.rejected(), candidates.len());
	}
}
