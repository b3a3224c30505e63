use std::collections::{BTreeSet, HashSet};

use log::info;
use rand::Rng;
use rand::seq::IndexedRandom;

/// Deduplicates, excludes already known names and draws at most `count` names.
///
/// # Parameters
/// - `names`: surviving candidate names, possibly repeated.
/// - `exclude`: names that must not be returned (typically already persisted).
/// - `count`: maximum number of names to return.
/// - `rng`: random source of the draw; inject a seeded one for reproducible runs.
///
/// # Returns
/// All remaining distinct names when there are at most `count` of them,
/// otherwise a uniform sample of exactly `count` distinct names, drawn
/// without replacement. The order of the result is unspecified.
///
/// # Notes
/// - Deduplication goes through an ordered set, so a seeded `rng` always
///   yields the same sample for the same inputs regardless of input order.
/// - An insufficient supply is not an error: the result is just shorter.
pub fn finalize<R: Rng + ?Sized>(
	names: impl IntoIterator<Item = String>,
	exclude: &HashSet<String>,
	count: usize,
	rng: &mut R,
) -> Vec<String> {
	let unique: BTreeSet<String> = names.into_iter().collect();
	let unique_count = unique.len();

	let remaining: Vec<String> = unique.into_iter().filter(|name| !exclude.contains(name)).collect();
	if remaining.len() < unique_count {
		info!("excluded {} already known names", unique_count - remaining.len());
	}

	if remaining.len() <= count {
		return remaining;
	}

	remaining.choose_multiple(rng, count).cloned().collect()
}
