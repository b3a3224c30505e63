use std::collections::BTreeSet;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Unordered pair of tags that must not appear together.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TagConflictRule {
	a: String,
	b: String,
}

impl TagConflictRule {
	pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
		Self { a: a.into(), b: b.into() }
	}

	/// Builds a rule from a configured `[A, B]` list.
	///
	/// Lists shorter than two elements are rejected; extra elements are ignored.
	pub fn from_list(pair: &[String]) -> Option<Self> {
		match pair {
			[a, b, ..] => Some(Self::new(a.clone(), b.clone())),
			_ => None,
		}
	}

	/// Returns `true` if both members of the pair are in `tags`.
	pub fn is_violated_by(&self, tags: &BTreeSet<String>) -> bool {
		tags.contains(&self.a) && tags.contains(&self.b)
	}

	pub fn members(&self) -> (&str, &str) {
		(&self.a, &self.b)
	}
}

/// Returns `false` iff some rule has both of its members in `tags`.
///
/// No rules means every tag set is compatible.
pub fn is_compatible(tags: &BTreeSet<String>, rules: &[TagConflictRule]) -> bool {
	match rules.iter().find(|rule| rule.is_violated_by(tags)) {
		Some(rule) => {
			let (a, b) = rule.members();
			debug!("tag conflict: '{a}' and '{b}' cannot appear together");
			false
		}
		None => true,
	}
}

/// Checks the union of two tag sets against the conflict rules.
pub fn check_pair_compatibility(
	tags_a: &BTreeSet<String>,
	tags_b: &BTreeSet<String>,
	rules: &[TagConflictRule],
) -> bool {
	let union: BTreeSet<String> = tags_a.union(tags_b).cloned().collect();
	is_compatible(&union, rules)
}

/// Tag configuration of a style: declared vocabulary and conflict rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagPolicy {
	pub available: Vec<String>,
	pub conflicts: Vec<TagConflictRule>,
}

impl TagPolicy {
	/// Builds a policy from the raw configured lists, dropping incomplete pairs.
	pub fn from_config(available: Vec<String>, conflicts: &[Vec<String>]) -> Self {
		let conflicts = conflicts
			.iter()
			.filter_map(|pair| {
				let rule = TagConflictRule::from_list(pair);
				if rule.is_none() {
					warn!("ignoring incomplete tag conflict rule: {pair:?}");
				}
				rule
			})
			.collect();
		Self { available, conflicts }
	}

	/// A style uses tags only when it declares at least one available tag.
	pub fn has_tag_system(&self) -> bool {
		!self.available.is_empty()
	}

	pub fn is_compatible(&self, tags: &BTreeSet<String>) -> bool {
		is_compatible(tags, &self.conflicts)
	}

	pub fn check_pair_compatibility(&self, tags_a: &BTreeSet<String>, tags_b: &BTreeSet<String>) -> bool {
		check_pair_compatibility(tags_a, tags_b, &self.conflicts)
	}

	/// Checks that every tag belongs to the declared vocabulary.
	///
	/// Without a declared vocabulary, any tag is accepted.
	pub fn validate_tags<'a, I>(&self, tags: I) -> bool
	where
		I: IntoIterator<Item = &'a String>,
	{
		if !self.has_tag_system() {
			return true;
		}
		for tag in tags {
			if !self.available.contains(tag) {
				warn!("tag '{tag}' is not in the declared vocabulary");
				return false;
			}
		}
		true
	}
}
