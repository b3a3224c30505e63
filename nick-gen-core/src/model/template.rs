use std::collections::BTreeSet;
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;

use super::word_root::{RootMap, WordRoot};

/// `{category}` or `{category:tag}`; `\w` is Unicode-aware so CJK names match.
static PLACEHOLDER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\{(\w+)(?::(\w+))?\}").expect("placeholder pattern is valid"));

/// A fully substituted name together with the union of its roots' tags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
	pub name: String,
	pub tags: BTreeSet<String>,
}

/// A placeholder of a template: the category to draw from and an optional
/// tag that every drawn root must carry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Placeholder {
	pub category: String,
	pub constraint: Option<String>,
}

/// One piece of a parsed template.
///
/// `Slot` indexes into `Template::placeholders`. Identical placeholder texts
/// share the same slot, so they always receive the same root.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
	Literal(String),
	Slot(usize),
}

/// A parsed template.
///
/// Parsing happens once; expansion walks the token list for every element of
/// the Cartesian product.
///
/// # Invariants
/// - `placeholders` holds distinct entries, in order of first appearance
/// - Every `Token::Slot` index is valid for `placeholders`
/// - Braces that do not form a valid placeholder stay literal text
#[derive(Clone, Debug)]
pub struct Template {
	source: String,
	tokens: Vec<Token>,
	placeholders: Vec<Placeholder>,
}

impl Template {
	/// Parses a template string in a single pass.
	pub fn parse(source: &str) -> Self {
		let mut tokens = Vec::new();
		let mut placeholders: Vec<Placeholder> = Vec::new();
		let mut last = 0;

		for caps in PLACEHOLDER.captures_iter(source) {
			let Some(whole) = caps.get(0) else { continue };
			if whole.start() > last {
				tokens.push(Token::Literal(source[last..whole.start()].to_owned()));
			}

			let placeholder = Placeholder {
				category: caps[1].to_owned(),
				constraint: caps.get(2).map(|m| m.as_str().to_owned()),
			};
			let slot = match placeholders.iter().position(|p| *p == placeholder) {
				Some(index) => index,
				None => {
					placeholders.push(placeholder);
					placeholders.len() - 1
				}
			};
			tokens.push(Token::Slot(slot));
			last = whole.end();
		}

		if last < source.len() {
			tokens.push(Token::Literal(source[last..].to_owned()));
		}

		Self { source: source.to_owned(), tokens, placeholders }
	}

	pub fn source(&self) -> &str {
		&self.source
	}

	/// Distinct placeholders, in order of first appearance.
	pub fn placeholders(&self) -> &[Placeholder] {
		&self.placeholders
	}

	/// A template without placeholders expands to itself.
	pub fn is_literal(&self) -> bool {
		self.placeholders.is_empty()
	}

	/// Resolves the root list of every placeholder.
	///
	/// Returns `None` when a category is missing or when a tag constraint
	/// leaves a category empty: the template then contributes nothing.
	fn resolve_axes<'r>(&self, roots: &'r RootMap) -> Option<Vec<Vec<&'r WordRoot>>> {
		let mut axes = Vec::with_capacity(self.placeholders.len());
		for placeholder in &self.placeholders {
			let Some(category) = roots.get(&placeholder.category) else {
				warn!(
					"template '{}': category '{}' has no word roots",
					self.source, placeholder.category
				);
				return None;
			};

			let axis: Vec<&WordRoot> = match &placeholder.constraint {
				Some(tag) => category.iter().filter(|root| root.has_tag(tag)).collect(),
				None => category.iter().collect(),
			};

			if axis.is_empty() {
				match &placeholder.constraint {
					Some(tag) => debug!(
						"template '{}': no root of '{}' carries tag '{}'",
						self.source, placeholder.category, tag
					),
					None => debug!("template '{}': category '{}' is empty", self.source, placeholder.category),
				}
				return None;
			}
			axes.push(axis);
		}
		Some(axes)
	}

	/// Number of candidates `expand` would produce, without producing them.
	///
	/// Saturates at `usize::MAX`.
	pub fn combinations(&self, roots: &RootMap) -> usize {
		if self.is_literal() {
			return 1;
		}
		match self.resolve_axes(roots) {
			Some(axes) => axes.iter().fold(1usize, |total, axis| total.saturating_mul(axis.len())),
			None => 0,
		}
	}

	/// Expands the template against `roots` via Cartesian product.
	///
	/// # Behavior
	/// - No placeholder: a single candidate equal to the template, without tags.
	/// - Missing category or empty constrained category: no candidate at all.
	/// - Otherwise one candidate per product tuple, the last placeholder
	///   varying fastest, with the union of the chosen roots' tags.
	pub fn expand(&self, roots: &RootMap) -> Vec<Candidate> {
		if self.is_literal() {
			return vec![Candidate { name: self.source.clone(), tags: BTreeSet::new() }];
		}

		let Some(axes) = self.resolve_axes(roots) else {
			return Vec::new();
		};

		let total = axes.iter().fold(1usize, |total, axis| total.saturating_mul(axis.len()));
		let mut candidates = Vec::with_capacity(total.min(1 << 20));
		let mut indices = vec![0usize; axes.len()];

		loop {
			candidates.push(self.substitute(&axes, &indices));

			// Odometer increment, rightmost axis first
			let mut position = axes.len();
			loop {
				if position == 0 {
					return candidates;
				}
				position -= 1;
				indices[position] += 1;
				if indices[position] < axes[position].len() {
					break;
				}
				indices[position] = 0;
			}
		}
	}

	/// Builds the candidate for one product tuple.
	fn substitute(&self, axes: &[Vec<&WordRoot>], indices: &[usize]) -> Candidate {
		let mut name = String::new();
		for token in &self.tokens {
			match token {
				Token::Literal(text) => name.push_str(text),
				Token::Slot(slot) => name.push_str(&axes[*slot][indices[*slot]].word),
			}
		}

		let mut tags = BTreeSet::new();
		for (axis, index) in axes.iter().zip(indices) {
			tags.extend(axis[*index].tags.iter().cloned());
		}

		Candidate { name, tags }
	}
}

/// Parses and expands a template string in one call.
pub fn expand(template: &str, roots: &RootMap) -> Vec<Candidate> {
	Template::parse(template).expand(roots)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roots() -> RootMap {
		let mut roots = RootMap::new();
		roots.insert(
			"A".into(),
			vec![
				WordRoot::new("云").with_tags(["冷色调"]),
				WordRoot::new("月").with_tags(["冷色调", "古典"]),
				WordRoot::new("日").with_tags(["暖色调"]),
			],
		);
		roots.insert("B".into(), vec![WordRoot::new("风"), WordRoot::new("阁").with_tags(["古典"])]);
		roots
	}

	fn names(candidates: &[Candidate]) -> Vec<&str> {
		candidates.iter().map(|c| c.name.as_str()).collect()
	}

	#[test]
	fn literal_template_expands_to_itself() {
		let candidates = expand("无名氏", &roots());
		assert_eq!(candidates, vec![Candidate { name: "无名氏".into(), tags: BTreeSet::new() }]);
	}

	#[test]
	fn cartesian_product_is_complete() {
		let candidates = expand("{A}{B}", &roots());
		assert_eq!(candidates.len(), 3 * 2);
		assert_eq!(names(&candidates), vec!["云风", "云阁", "月风", "月阁", "日风", "日阁"]);
	}

	#[test]
	fn tags_are_unioned() {
		let candidates = expand("{A}{B}", &roots());
		let moon_pavilion = candidates.iter().find(|c| c.name == "月阁").unwrap();
		let expected: BTreeSet<String> = ["冷色调", "古典"].iter().map(|t| t.to_string()).collect();
		assert_eq!(moon_pavilion.tags, expected);
	}

	#[test]
	fn tag_constraint_restricts_category() {
		let candidates = expand("{A:冷色调}{B}", &roots());
		assert_eq!(names(&candidates), vec!["云风", "云阁", "月风", "月阁"]);
	}

	#[test]
	fn unsatisfiable_constraint_empties_template() {
		assert!(expand("{A:不存在}{B}", &roots()).is_empty());
	}

	#[test]
	fn missing_category_empties_template() {
		assert!(expand("{A}{缺失}", &roots()).is_empty());
	}

	#[test]
	fn literal_text_and_malformed_braces_are_kept() {
		let candidates = expand("小{B}-{A:冷色调}{", &roots());
		assert_eq!(candidates.len(), 4);
		assert_eq!(candidates[0].name, "小风-云{");

		let candidates = expand("{ A}{B}", &roots());
		assert_eq!(names(&candidates), vec!["{ A}风", "{ A}阁"]);
	}

	#[test]
	fn repeated_placeholder_reuses_the_same_root() {
		let template = Template::parse("{B}{A}{B}");
		assert_eq!(template.placeholders().len(), 2);

		let candidates = template.expand(&roots());
		assert_eq!(candidates.len(), 2 * 3);
		assert!(candidates.iter().all(|c| {
			let chars: Vec<char> = c.name.chars().collect();
			chars[0] == chars[2]
		}));
	}

	#[test]
	fn constrained_and_plain_occurrences_are_independent() {
		// `{A}` and `{A:古典}` are different placeholders and vary independently
		let template = Template::parse("{A}{A:古典}");
		assert_eq!(template.placeholders().len(), 2);
		assert_eq!(template.expand(&roots()).len(), 3);
	}

	#[test]
	fn combinations_match_expansion() {
		let roots = roots();
		for source in ["{A}{B}", "{A:冷色调}{B}", "{A}{缺失}", "固定", "{B}{A}{B}"] {
			let template = Template::parse(source);
			assert_eq!(template.combinations(&roots), template.expand(&roots).len(), "{source}");
		}
	}
}
