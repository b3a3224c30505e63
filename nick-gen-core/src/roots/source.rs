use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::{Value, json};

use crate::config::{CategorySpec, ConfigManager};
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::model::word_root::{RawRoot, RootMap, WordRoot, normalize_category};

/// Key of the word root prompt in `prompts.yaml`.
pub const WORD_ROOT_PROMPT: &str = "word_root_generation";

const DEFAULT_COUNT_PER_CATEGORY: usize = 25;

const DEFAULT_PROMPT_TEMPLATE: &str = "请为{style_name}风格生成词根，包含以下类别：

{categories_desc}

要求：
1. 尽量按照每个类别指定的数量生成优质词根，避免生成劣质不符合风格的词根充数
2. 必须符合{style_name}风格特征
3. 避免生僻字，常用字优先
4. 适合与其他词根组合成昵称
5. 词根长度1-4字为宜，鼓励使用双字词组增加多样性
6. 高质量、有美感、无攻击性、无敏感词
7. 避免不同类别之间出现重复词根
8. 同一类别内词根不重复
9. 词根之间要有明显差异，避免意思过于相近
10. 双字词根优先选择有画面感、有情感的词汇
可用标签：{available_tags}

返回JSON格式（仅返回JSON对象，无其他文字）：
{example_json}
";

/// Produces a fresh set of word roots for a style.
pub trait RootSource: Send + Sync {
	fn generate(&self, style_name: &str) -> Result<RootMap>;
}

/// Generates all categories of a style with a single LLM request.
///
/// # Behavior
/// - One prompt per style listing every configured category
/// - The answer is parsed as a JSON object `{category: [root, ...]}`
/// - Short categories are padded by cycling through the configured examples
/// - Any API or parse failure falls back to the configured examples
pub struct LlmRootSource {
	config: Arc<ConfigManager>,
	llm: Arc<dyn TextGenerator>,
}

impl LlmRootSource {
	pub fn new(config: Arc<ConfigManager>, llm: Arc<dyn TextGenerator>) -> Self {
		Self { config, llm }
	}

	fn categories(&self, style_name: &str) -> Vec<CategorySpec> {
		let categories = self.config.word_root_categories(style_name);
		if categories.is_empty() {
			warn!("[{style_name}] no word root categories configured, using the default category");
			return vec![default_category()];
		}
		categories
	}

	/// Builds the batch prompt, from `prompts.yaml` when it defines one.
	pub fn build_prompt(&self, style_name: &str, categories: &[CategorySpec]) -> String {
		let available_tags = self.config.tag_policy(style_name).available;
		let template =
			self.config.prompt_template(WORD_ROOT_PROMPT).unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_owned());
		render_prompt(&template, style_name, categories, &available_tags)
	}
}

impl RootSource for LlmRootSource {
	fn generate(&self, style_name: &str) -> Result<RootMap> {
		let categories = self.categories(style_name);
		let prompt = self.build_prompt(style_name, &categories);

		info!("[{style_name}] generating word roots for {} categories", categories.len());
		let content = match self.llm.generate(&prompt) {
			Ok(content) => content,
			Err(e) => {
				error!("[{style_name}] word root generation failed, using examples: {e}");
				return Ok(roots_from_examples(&categories));
			}
		};

		let roots = match parse_response(style_name, &content, &categories) {
			Some(roots) => roots,
			None => {
				debug!("raw response: {}", content.chars().take(200).collect::<String>());
				roots_from_examples(&categories)
			}
		};

		// Undeclared tags are kept, they simply never match a constraint
		let policy = self.config.tag_policy(style_name);
		let undeclared = roots.values().flatten().filter(|root| !policy.validate_tags(&root.tags)).count();
		if undeclared > 0 {
			warn!("[{style_name}] {undeclared} roots carry tags outside the declared vocabulary");
		}
		for (category, list) in &roots {
			info!("[{style_name}] category '{category}' has {} roots", list.len());
		}
		Ok(roots)
	}
}

fn default_category() -> CategorySpec {
	CategorySpec {
		name: "默认".to_owned(),
		description: "通用词根".to_owned(),
		examples: vec!["词".to_owned(), "根".to_owned()],
		count_per_category: DEFAULT_COUNT_PER_CATEGORY,
	}
}

/// Fills the prompt template.
///
/// # Placeholders
/// - `{style_name}`
/// - `{categories_desc}`: one line per category with count and up to 5 examples
/// - `{available_tags}`: tags joined with `、`, or `无`
/// - `{example_json}`: expected answer shape, with tags when the style has any
fn render_prompt(template: &str, style_name: &str, categories: &[CategorySpec], available_tags: &[String]) -> String {
	let categories_desc = categories
		.iter()
		.map(|category| {
			let examples = if category.examples.is_empty() {
				"无".to_owned()
			} else {
				category.examples.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
			};
			format!(
				"- {}: {}（{}个），参考示例：{examples}",
				category.name, category.description, category.count_per_category
			)
		})
		.collect::<Vec<_>>()
		.join("\n");

	let tags_desc = if available_tags.is_empty() { "无".to_owned() } else { available_tags.join("、") };

	fill_placeholders(template, |name| match name {
		"style_name" => Some(style_name.to_owned()),
		"categories_desc" => Some(categories_desc.clone()),
		"available_tags" => Some(tags_desc.clone()),
		"example_json" => Some(example_json(categories, available_tags)),
		_ => None,
	})
}

/// Single pass over a `{name}` template.
///
/// `{{` and `}}` are literal braces. Unknown placeholders and unmatched
/// braces are kept as written. Substituted values are never rescanned.
fn fill_placeholders(template: &str, value: impl Fn(&str) -> Option<String>) -> String {
	let mut output = String::with_capacity(template.len());
	let mut rest = template;

	while let Some(pos) = rest.find(['{', '}']) {
		output.push_str(&rest[..pos]);
		let tail = &rest[pos..];

		if let Some(after) = tail.strip_prefix("{{").or_else(|| tail.strip_prefix("}}")) {
			output.push_str(&tail[..1]);
			rest = after;
			continue;
		}
		if tail.starts_with('}') {
			output.push('}');
			rest = &tail[1..];
			continue;
		}

		let placeholder = tail[1..].find(['{', '}']).filter(|&end| tail[1 + end..].starts_with('}'));
		match placeholder.and_then(|end| value(&tail[1..1 + end]).map(|v| (end, v))) {
			Some((end, v)) => {
				output.push_str(&v);
				rest = &tail[end + 2..];
			}
			None => {
				output.push('{');
				rest = &tail[1..];
			}
		}
	}

	output.push_str(rest);
	output
}

fn example_json(categories: &[CategorySpec], available_tags: &[String]) -> String {
	let mut output = serde_json::Map::new();
	for category in categories {
		let example = |i: usize, fallback: &str| category.examples.get(i).cloned().unwrap_or_else(|| fallback.to_owned());
		let value = match available_tags.first() {
			Some(tag) => json!([
				{ "word": example(0, "示例1"), "tags": [tag] },
				{ "word": example(1, "示例2"), "tags": [tag] },
			]),
			None if category.examples.is_empty() => json!(["示例1", "示例2", "示例3"]),
			None => json!(category.examples.iter().take(3).collect::<Vec<_>>()),
		};
		output.insert(category.name.clone(), value);
	}
	serde_json::to_string_pretty(&Value::Object(output)).unwrap_or_default()
}

/// Removes a surrounding Markdown code fence, with or without a `json` tag.
fn strip_code_fence(content: &str) -> &str {
	let mut content = content.trim();
	if let Some(rest) = content.strip_prefix("```json") {
		content = rest;
	} else if let Some(rest) = content.strip_prefix("```") {
		content = rest;
	}
	if let Some(rest) = content.strip_suffix("```") {
		content = rest;
	}
	content.trim()
}

/// Parses an LLM answer; `None` when it is not a JSON object.
fn parse_response(style_name: &str, content: &str, categories: &[CategorySpec]) -> Option<RootMap> {
	let parsed: Value = match serde_json::from_str(strip_code_fence(content)) {
		Ok(value) => value,
		Err(e) => {
			error!("[{style_name}] failed to parse word roots: {e}");
			return None;
		}
	};
	let Value::Object(mut answer) = parsed else {
		warn!("[{style_name}] expected a JSON object, using examples");
		return None;
	};

	let mut roots = RootMap::new();
	for category in categories {
		let entries = match answer.remove(&category.name) {
			Some(Value::Array(items)) => items.into_iter().map(raw_entry).collect(),
			Some(_) => {
				warn!("[{style_name}] category '{}' is not a list, using examples", category.name);
				category.examples.iter().cloned().map(RawRoot::Plain).collect()
			}
			None => Vec::new(),
		};

		let mut list = normalize_category(style_name, entries);
		pad_with_examples(&mut list, category);
		roots.insert(category.name.clone(), list);
	}
	Some(roots)
}

fn raw_entry(value: Value) -> RawRoot {
	serde_json::from_value(value.clone()).unwrap_or(RawRoot::Malformed(value))
}

/// Cycles through the examples until the category holds `count_per_category` roots.
fn pad_with_examples(list: &mut Vec<WordRoot>, category: &CategorySpec) {
	if category.examples.is_empty() {
		return;
	}
	while list.len() < category.count_per_category {
		let example = &category.examples[list.len() % category.examples.len()];
		list.push(WordRoot::new(example.as_str()));
	}
}

/// Fallback roots: the first `count_per_category` examples of every category.
fn roots_from_examples(categories: &[CategorySpec]) -> RootMap {
	categories
		.iter()
		.map(|category| {
			let list = category
				.examples
				.iter()
				.take(category.count_per_category)
				.map(|example| WordRoot::new(example.as_str()))
				.collect();
			(category.name.clone(), list)
		})
		.collect::<BTreeMap<_, _>>()
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;
	use crate::config::fixtures::config_dir;
	use crate::error::LlmError;

	/// Returns a canned answer and records the prompts it receives.
	struct CannedLlm {
		answer: std::result::Result<String, String>,
		prompts: Mutex<Vec<String>>,
	}

	impl CannedLlm {
		fn answering(answer: &str) -> Arc<Self> {
			Arc::new(Self { answer: Ok(answer.to_owned()), prompts: Mutex::new(Vec::new()) })
		}

		fn failing() -> Arc<Self> {
			Arc::new(Self { answer: Err("余额不足".to_owned()), prompts: Mutex::new(Vec::new()) })
		}
	}

	impl TextGenerator for CannedLlm {
		fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError> {
			self.prompts.lock().unwrap().push(prompt.to_owned());
			self.answer.clone().map_err(LlmError::Provider)
		}
	}

	fn make_source(llm: Arc<CannedLlm>, prompts: Option<&str>) -> (tempfile::TempDir, LlmRootSource) {
		let dir = config_dir(prompts);
		let config = Arc::new(ConfigManager::new(dir.path()).unwrap());
		(dir, LlmRootSource::new(config, llm))
	}

	#[test]
	fn prompt_lists_categories_tags_and_example_json() {
		let llm = CannedLlm::answering("{}");
		let (_dir, source) = make_source(llm, None);
		let categories = source.categories("古风");
		let prompt = source.build_prompt("古风", &categories);

		assert!(prompt.contains("请为古风风格生成词根"));
		assert!(prompt.contains("- 意象: 自然意象（25个），参考示例：云, 月"));
		assert!(prompt.contains("- 建筑: 古典建筑（10个），参考示例：阁, 轩"));
		assert!(prompt.contains("冷色调、暖色调"));
		assert!(prompt.contains("\"word\": \"云\""));
	}

	#[test]
	fn prompt_template_can_be_overridden() {
		let llm = CannedLlm::answering("{}");
		let (_dir, source) =
			make_source(llm, Some("prompts:\n  word_root_generation:\n    template: \"{style_name}|{available_tags}\"\n"));
		let prompt = source.build_prompt("古风", &source.categories("古风"));
		assert_eq!(prompt, "古风|冷色调、暖色调");
	}

	#[test]
	fn doubled_braces_render_as_literal_braces() {
		let llm = CannedLlm::answering("{}");
		let (_dir, source) = make_source(
			llm,
			Some("prompts:\n  word_root_generation:\n    template: '{style_name}: 例如 {{\"意象\": [\"云\"]}} {unknown}'\n"),
		);
		let prompt = source.build_prompt("古风", &source.categories("古风"));
		assert_eq!(prompt, "古风: 例如 {\"意象\": [\"云\"]} {unknown}");
	}

	#[test]
	fn substituted_values_are_not_unescaped() {
		let values = |name: &str| (name == "json").then(|| "{{\"a\": 1}}".to_owned());
		assert_eq!(fill_placeholders("{json}|{{json}}", values), "{{\"a\": 1}}|{json}");
		assert_eq!(fill_placeholders("a } b { c", values), "a } b { c");
		assert_eq!(fill_placeholders("{missing}", values), "{missing}");
	}

	#[test]
	fn fenced_answer_is_parsed_and_padded() {
		let answer = "```json\n{\"意象\": [\"云\", {\"word\": \"霜\", \"tags\": [\"冷色调\"]}, 42], \"建筑\": [\"楼\"]}\n```";
		let llm = CannedLlm::answering(answer);
		let (_dir, source) = make_source(llm.clone(), None);

		let roots = source.generate("古风").unwrap();
		assert_eq!(llm.prompts.lock().unwrap().len(), 1);

		let imagery = &roots["意象"];
		assert_eq!(imagery.len(), 25);
		assert_eq!(imagery[0], WordRoot::new("云"));
		assert!(imagery[1].has_tag("冷色调"));
		// padding cycles examples by position
		assert_eq!(imagery[2], WordRoot::new("云"));
		assert_eq!(imagery[3], WordRoot::new("月"));

		assert_eq!(roots["建筑"].len(), 10);
		assert_eq!(roots["建筑"][0], WordRoot::new("楼"));
	}

	#[test]
	fn api_failure_falls_back_to_examples() {
		let (_dir, source) = make_source(CannedLlm::failing(), None);
		let roots = source.generate("古风").unwrap();
		assert_eq!(roots["意象"], vec![WordRoot::new("云"), WordRoot::new("月")]);
		assert_eq!(roots["建筑"], vec![WordRoot::new("阁"), WordRoot::new("轩")]);
	}

	#[test]
	fn non_object_answer_falls_back_to_examples() {
		let (_dir, source) = make_source(CannedLlm::answering("[\"云\", \"月\"]"), None);
		let roots = source.generate("古风").unwrap();
		assert_eq!(roots["意象"].len(), 2);

		let (_dir, source) = make_source(CannedLlm::answering("不是 JSON"), None);
		assert_eq!(source.generate("古风").unwrap()["建筑"].len(), 2);
	}

	#[test]
	fn unconfigured_style_uses_default_category() {
		let (_dir, source) = make_source(CannedLlm::failing(), None);
		let roots = source.generate("赛博").unwrap();
		assert_eq!(roots["默认"], vec![WordRoot::new("词"), WordRoot::new("根")]);
	}

	#[test]
	fn code_fences_are_stripped() {
		assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
		assert_eq!(strip_code_fence("```\n[]\n```"), "[]");
		assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
	}
}
