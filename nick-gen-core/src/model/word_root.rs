use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Mapping from category name to its ordered list of roots.
///
/// The category name is the token used by `{category}` placeholders.
/// Duplicate words inside one category are allowed.
pub type RootMap = BTreeMap<String, Vec<WordRoot>>;

/// An atomic fragment of a nickname, annotated with semantic tags.
///
/// # Invariants
/// - Immutable for the duration of a generation run
/// - `tags` is a set: the order in which tags were declared is not kept
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WordRoot {
	pub word: String,
	#[serde(default)]
	pub tags: BTreeSet<String>,
}

impl WordRoot {
	/// Creates an untagged root.
	pub fn new(word: impl Into<String>) -> Self {
		Self { word: word.into(), tags: BTreeSet::new() }
	}

	/// Replaces the tag set of this root.
	pub fn with_tags<I, S>(mut self, tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.tags = tags.into_iter().map(Into::into).collect();
		self
	}

	pub fn has_tag(&self, tag: &str) -> bool {
		self.tags.contains(tag)
	}
}

/// A root entry as found in a root file or in an LLM response.
///
/// Two shapes are accepted:
/// - legacy plain string: `"云"`
/// - structured entry: `{word: "云", tags: ["冷色调"]}` (`tags` optional)
///
/// A structured entry is kept whatever its `tags` hold: a single string
/// becomes a one-tag list, null means no tags, other values are dropped
/// with a warning.
///
/// Anything else is captured as `Malformed` so a single bad entry does not
/// reject the whole document.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawRoot {
	Plain(String),
	Structured {
		word: String,
		#[serde(default, deserialize_with = "lenient_tags")]
		tags: Vec<String>,
	},
	Malformed(Value),
}

fn lenient_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
	let tags = match Value::deserialize(deserializer)? {
		Value::Null => Vec::new(),
		Value::String(tag) => vec![tag],
		Value::Array(items) => items
			.into_iter()
			.filter_map(|item| match item {
				Value::String(tag) => Some(tag),
				other => {
					warn!("non-text word root tag ignored: {other}");
					None
				}
			})
			.collect(),
		other => {
			warn!("word root tags ignored, expected a list: {other}");
			Vec::new()
		}
	};
	Ok(tags)
}

impl RawRoot {
	/// Converts the raw entry into a `WordRoot`.
	///
	/// Returns `None` for malformed entries.
	pub fn into_word_root(self) -> Option<WordRoot> {
		match self {
			RawRoot::Plain(word) => Some(WordRoot::new(word)),
			RawRoot::Structured { word, tags } => Some(WordRoot::new(word).with_tags(tags)),
			RawRoot::Malformed(_) => None,
		}
	}
}

/// Normalizes the raw entries of one category, skipping malformed ones.
///
/// Every skipped entry is reported with a warning; the load itself never fails.
pub fn normalize_category(style_name: &str, entries: Vec<RawRoot>) -> Vec<WordRoot> {
	let mut roots = Vec::with_capacity(entries.len());
	for entry in entries {
		match entry {
			RawRoot::Malformed(value) => {
				warn!("[{style_name}] malformed word root skipped: {value}");
			}
			other => roots.extend(other.into_word_root()),
		}
	}
	roots
}

/// Normalizes a whole `{category: [raw entries]}` document.
pub fn normalize_roots(style_name: &str, categories: BTreeMap<String, Vec<RawRoot>>) -> RootMap {
	categories
		.into_iter()
		.map(|(category, entries)| (category, normalize_category(style_name, entries)))
		.collect()
}

/// Total number of roots across all categories.
pub fn count_roots(roots: &RootMap) -> usize {
	roots.values().map(Vec::len).sum()
}
