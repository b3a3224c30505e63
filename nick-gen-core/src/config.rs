use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::SystemTime;

use log::{error, info, warn};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;
use crate::io;
use crate::model::filter::StyleFilterConfig;
use crate::model::generator::StyleRules;
use crate::model::tags::TagPolicy;

const SYSTEM_FILE: &str = "config.yaml";
const STYLES_FILE: &str = "styles.yaml";
const PROMPTS_FILE: &str = "prompts.yaml";

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

// ---------------------------------------------------------------------------
// config.yaml
// ---------------------------------------------------------------------------

/// Content of `config.yaml`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SystemConfig {
	#[serde(default)]
	pub api: ApiConfig,
	#[serde(default)]
	pub storage: StorageConfig,
	#[serde(default)]
	pub generation: GenerationConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApiConfig {
	#[serde(default)]
	pub glm: GlmConfig,
	/// Request timeout, in seconds.
	#[serde(default = "default_timeout")]
	pub timeout: u64,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Base of the exponential backoff, in seconds.
	#[serde(default = "default_retry_wait_base")]
	pub retry_wait_base: u64,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			glm: GlmConfig::default(),
			timeout: default_timeout(),
			max_retries: default_max_retries(),
			retry_wait_base: default_retry_wait_base(),
		}
	}
}

#[derive(Deserialize, Debug, Clone)]
pub struct GlmConfig {
	pub api_key: Option<String>,
	#[serde(default = "default_model")]
	pub model: String,
	#[serde(default = "default_base_url")]
	pub base_url: String,
}

impl Default for GlmConfig {
	fn default() -> Self {
		Self { api_key: None, model: default_model(), base_url: default_base_url() }
	}
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self { data_dir: default_data_dir() }
	}
}

/// Default run parameters of the binaries.
#[derive(Deserialize, Debug, Clone)]
pub struct GenerationConfig {
	pub style: Option<String>,
	#[serde(default = "default_count")]
	pub count: usize,
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self { style: None, count: default_count() }
	}
}

fn default_timeout() -> u64 {
	30
}

fn default_max_retries() -> u32 {
	3
}

fn default_retry_wait_base() -> u64 {
	2
}

fn default_model() -> String {
	"glm-4-flash".to_owned()
}

fn default_base_url() -> String {
	"https://open.bigmodel.cn/api/paas/v4/chat/completions".to_owned()
}

fn default_data_dir() -> PathBuf {
	PathBuf::from("data")
}

fn default_count() -> usize {
	100
}

// ---------------------------------------------------------------------------
// styles.yaml
// ---------------------------------------------------------------------------

/// Content of `styles.yaml`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct StylesDocument {
	#[serde(default)]
	pub styles: BTreeMap<String, StyleConfig>,
	#[serde(default)]
	pub word_roots: WordRootsConfig,
	#[serde(default)]
	pub filters: GlobalFilters,
	#[serde(default)]
	pub defaults: StyleDefaults,
}

/// One style entry. Absent values fall back to the global defaults.
#[derive(Deserialize, Debug, Clone)]
pub struct StyleConfig {
	pub description: Option<String>,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	pub length_min: Option<usize>,
	pub length_max: Option<usize>,
	pub charset: Option<String>,
	#[serde(default)]
	pub tags: TagConfig,
	#[serde(default)]
	pub filters: StyleFilterOverrides,
}

fn default_enabled() -> bool {
	true
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TagConfig {
	#[serde(default)]
	pub available: Vec<String>,
	#[serde(default)]
	pub conflicts: Vec<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StyleFilterOverrides {
	pub forbid_duplicate_chars: Option<bool>,
	pub forbidden_combinations: Option<Vec<Vec<String>>>,
}

/// `word_roots` section: categories and templates, keyed by style.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct WordRootsConfig {
	#[serde(default)]
	pub categories: BTreeMap<String, Vec<CategorySpec>>,
	#[serde(default)]
	pub templates: BTreeMap<String, Vec<String>>,
}

/// Declaration of a root category, used to prompt the LLM.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CategorySpec {
	pub name: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub examples: Vec<String>,
	#[serde(default = "default_count_per_category")]
	pub count_per_category: usize,
}

fn default_count_per_category() -> usize {
	25
}

#[derive(Deserialize, Debug, Clone)]
pub struct GlobalFilters {
	#[serde(default = "default_forbid_duplicate_chars")]
	pub forbid_duplicate_chars: bool,
	#[serde(default)]
	pub forbidden_combinations: BTreeMap<String, Vec<Vec<String>>>,
}

impl Default for GlobalFilters {
	fn default() -> Self {
		Self { forbid_duplicate_chars: default_forbid_duplicate_chars(), forbidden_combinations: BTreeMap::new() }
	}
}

fn default_forbid_duplicate_chars() -> bool {
	true
}

#[derive(Deserialize, Debug, Clone)]
pub struct StyleDefaults {
	#[serde(default = "default_length_min")]
	pub length_min: usize,
	#[serde(default = "default_length_max")]
	pub length_max: usize,
}

impl Default for StyleDefaults {
	fn default() -> Self {
		Self { length_min: default_length_min(), length_max: default_length_max() }
	}
}

fn default_length_min() -> usize {
	2
}

fn default_length_max() -> usize {
	6
}

// ---------------------------------------------------------------------------
// prompts.yaml
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PromptsDocument {
	#[serde(default)]
	pub prompts: BTreeMap<String, PromptConfig>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PromptConfig {
	pub template: Option<String>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LoadedConfig {
	system: SystemConfig,
	styles: StylesDocument,
	prompts: PromptsDocument,
	system_mtime: Option<SystemTime>,
	styles_mtime: Option<SystemTime>,
	prompts_mtime: Option<SystemTime>,
}

/// Loads the YAML configuration directory and reloads files when they change.
///
/// # Responsibilities
/// - Parse `config.yaml` (required), `styles.yaml` (required) and `prompts.yaml` (optional)
/// - Substitute `${VAR}` in `config.yaml` from the environment
/// - Resolve per-style values against the global defaults
///
/// Every getter first checks file modification times. A reload that fails
/// keeps the previous configuration.
#[derive(Debug)]
pub struct ConfigManager {
	dir: PathBuf,
	state: RwLock<LoadedConfig>,
}

impl ConfigManager {
	/// Loads every configuration file of `dir`.
	///
	/// # Errors
	/// - `NotFound` if the directory, `config.yaml` or `styles.yaml` is missing
	/// - `ParseFailed` / `ReadFailed` on unreadable files
	pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigError> {
		let dir = io::normalize_folder(dir);
		if !dir.is_dir() {
			return Err(ConfigError::NotFound(dir));
		}

		let manager = Self { dir, state: RwLock::new(LoadedConfig::default()) };
		{
			let mut state = manager.state.write().map_err(|_| ConfigError::Poisoned)?;
			manager.load_system(&mut state)?;
			manager.load_styles(&mut state)?;
			manager.load_prompts(&mut state);
		}
		Ok(manager)
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn load_system(&self, state: &mut LoadedConfig) -> Result<(), ConfigError> {
		let path = self.dir.join(SYSTEM_FILE);
		let content = read_required(&path)?;
		let content = substitute_env_vars(&content);
		state.system = parse_yaml(&path, &content)?;
		state.system_mtime = io::modified(&path);
		info!("loaded system configuration: {}", path.display());
		Ok(())
	}

	fn load_styles(&self, state: &mut LoadedConfig) -> Result<(), ConfigError> {
		let path = self.dir.join(STYLES_FILE);
		let content = read_required(&path)?;
		state.styles = parse_yaml(&path, &content)?;
		state.styles_mtime = io::modified(&path);
		info!("loaded style configuration: {}, {} styles", path.display(), state.styles.styles.len());
		Ok(())
	}

	/// `prompts.yaml` is optional; any problem falls back to built-in prompts.
	fn load_prompts(&self, state: &mut LoadedConfig) {
		let path = self.dir.join(PROMPTS_FILE);
		if !path.exists() {
			warn!("prompt configuration not found: {}, using built-in prompts", path.display());
			state.prompts = PromptsDocument::default();
			return;
		}

		let loaded = fs::read_to_string(&path)
			.map_err(|e| ConfigError::read_failed(&path, e))
			.and_then(|content| parse_yaml(&path, &content));
		match loaded {
			Ok(prompts) => {
				state.prompts = prompts;
				state.prompts_mtime = io::modified(&path);
				info!("loaded prompt configuration: {}, {} prompts", path.display(), state.prompts.prompts.len());
			}
			Err(e) => {
				error!("failed to load prompt configuration: {e}");
				state.prompts = PromptsDocument::default();
			}
		}
	}

	/// Reloads every file whose modification time is newer than the loaded one.
	///
	/// Returns `true` if anything was reloaded.
	pub fn check_and_reload(&self) -> Result<bool, ConfigError> {
		let mut state = self.state.write().map_err(|_| ConfigError::Poisoned)?;
		let mut changed = false;

		if is_newer(io::modified(self.dir.join(STYLES_FILE)), state.styles_mtime) {
			info!("{STYLES_FILE} changed, reloading");
			self.load_styles(&mut state)?;
			changed = true;
		}
		if is_newer(io::modified(self.dir.join(SYSTEM_FILE)), state.system_mtime) {
			info!("{SYSTEM_FILE} changed, reloading");
			self.load_system(&mut state)?;
			changed = true;
		}
		if is_newer(io::modified(self.dir.join(PROMPTS_FILE)), state.prompts_mtime) {
			info!("{PROMPTS_FILE} changed, reloading");
			self.load_prompts(&mut state);
			changed = true;
		}

		Ok(changed)
	}

	/// Runs `f` on the current configuration, after a reload check.
	fn read<T>(&self, f: impl FnOnce(&LoadedConfig) -> T) -> T {
		if let Err(e) = self.check_and_reload() {
			error!("configuration reload failed, keeping previous values: {e}");
		}
		match self.state.read() {
			Ok(state) => f(&state),
			Err(poisoned) => f(&poisoned.into_inner()),
		}
	}

	pub fn system(&self) -> SystemConfig {
		self.read(|state| state.system.clone())
	}

	pub fn style(&self, style_name: &str) -> Option<StyleConfig> {
		self.read(|state| state.styles.styles.get(style_name).cloned())
	}

	/// Names of all enabled styles.
	pub fn list_styles(&self) -> Vec<String> {
		self.read(|state| {
			state
				.styles
				.styles
				.iter()
				.filter(|(_, style)| style.enabled)
				.map(|(name, _)| name.clone())
				.collect()
		})
	}

	/// Checks that the style exists and declares description, length bounds and charset.
	pub fn validate_style(&self, style_name: &str) -> Result<(), ConfigError> {
		let style = self.style(style_name).ok_or_else(|| ConfigError::UnknownStyle(style_name.to_owned()))?;
		let missing: Vec<&str> = [
			("description", style.description.is_none()),
			("length_min", style.length_min.is_none()),
			("length_max", style.length_max.is_none()),
			("charset", style.charset.is_none()),
		]
		.into_iter()
		.filter_map(|(key, absent)| absent.then_some(key))
		.collect();

		if missing.is_empty() {
			Ok(())
		} else {
			Err(ConfigError::InvalidStyle {
				style: style_name.to_owned(),
				reason: format!("missing {}", missing.join(", ")),
			})
		}
	}

	pub fn word_root_categories(&self, style_name: &str) -> Vec<CategorySpec> {
		self.read(|state| state.styles.word_roots.categories.get(style_name).cloned().unwrap_or_default())
	}

	pub fn templates(&self, style_name: &str) -> Vec<String> {
		self.read(|state| state.styles.word_roots.templates.get(style_name).cloned().unwrap_or_default())
	}

	/// Tag vocabulary and conflict rules of a style; empty when not configured.
	pub fn tag_policy(&self, style_name: &str) -> TagPolicy {
		self.read(|state| match state.styles.styles.get(style_name) {
			Some(style) => TagPolicy::from_config(style.tags.available.clone(), &style.tags.conflicts),
			None => TagPolicy::default(),
		})
	}

	/// Filter configuration of a style, style values overriding global ones.
	pub fn filter_config(&self, style_name: &str) -> StyleFilterConfig {
		self.read(|state| resolve_filter_config(&state.styles, style_name))
	}

	/// Everything the generator needs for `style_name`.
	///
	/// # Errors
	/// `UnknownStyle` if the style is not configured.
	pub fn style_rules(&self, style_name: &str) -> Result<StyleRules, ConfigError> {
		self.read(|state| {
			let style = state
				.styles
				.styles
				.get(style_name)
				.ok_or_else(|| ConfigError::UnknownStyle(style_name.to_owned()))?;
			Ok(StyleRules {
				style: style_name.to_owned(),
				templates: state.styles.word_roots.templates.get(style_name).cloned().unwrap_or_default(),
				filter: resolve_filter_config(&state.styles, style_name),
				tags: TagPolicy::from_config(style.tags.available.clone(), &style.tags.conflicts),
			})
		})
	}

	/// Template text of a prompt kind from `prompts.yaml`, if configured.
	pub fn prompt_template(&self, kind: &str) -> Option<String> {
		self.read(|state| state.prompts.prompts.get(kind).and_then(|prompt| prompt.template.clone()))
	}
}

fn resolve_filter_config(document: &StylesDocument, style_name: &str) -> StyleFilterConfig {
	let style = document.styles.get(style_name);
	let overrides = style.map(|s| &s.filters);

	StyleFilterConfig {
		forbid_duplicate_chars: overrides
			.and_then(|o| o.forbid_duplicate_chars)
			.unwrap_or(document.filters.forbid_duplicate_chars),
		forbidden_combinations: overrides
			.and_then(|o| o.forbidden_combinations.clone())
			.or_else(|| document.filters.forbidden_combinations.get(style_name).cloned())
			.unwrap_or_default(),
		length_min: style.and_then(|s| s.length_min).unwrap_or(document.defaults.length_min),
		length_max: style.and_then(|s| s.length_max).unwrap_or(document.defaults.length_max),
	}
}

fn is_newer(current: Option<SystemTime>, loaded: Option<SystemTime>) -> bool {
	match (current, loaded) {
		(Some(current), Some(loaded)) => current > loaded,
		(Some(_), None) => true,
		_ => false,
	}
}

fn read_required(path: &Path) -> Result<String, ConfigError> {
	if !path.exists() {
		return Err(ConfigError::NotFound(path.to_path_buf()));
	}
	fs::read_to_string(path).map_err(|e| ConfigError::read_failed(path, e))
}

fn parse_yaml<T: DeserializeOwned + Default>(path: &Path, content: &str) -> Result<T, ConfigError> {
	// An empty document is a valid, empty configuration
	if content.trim().is_empty() {
		return Ok(T::default());
	}
	serde_yaml_ng::from_str(content).map_err(|e| ConfigError::parse_failed(path, e))
}

/// Replaces `${VAR}` with the value of the environment variable `VAR`.
///
/// Unknown variables are left untouched.
pub fn substitute_env_vars(content: &str) -> String {
	substitute_with(content, |name| std::env::var(name).ok())
}

fn substitute_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
	ENV_VAR
		.replace_all(content, |caps: &regex::Captures| lookup(&caps[1]).unwrap_or_else(|| caps[0].to_owned()))
		.into_owned()
}


#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::fixtures::*;
	use super::*;

	/// Rewrites a file with a modification time clearly after the loaded one.
	fn rewrite_later(path: &Path, content: &str, offset_secs: u64) {
		fs::write(path, content).unwrap();
		let later = SystemTime::now() + Duration::from_secs(offset_secs);
		fs::File::options().write(true).open(path).unwrap().set_modified(later).unwrap();
	}

	#[test]
	fn missing_directory_is_an_error() {
		assert!(matches!(ConfigManager::new("/definitely/not/here"), Err(ConfigError::NotFound(_))));
	}

	#[test]
	fn missing_styles_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join(SYSTEM_FILE), SYSTEM).unwrap();
		assert!(matches!(ConfigManager::new(dir.path()), Err(ConfigError::NotFound(_))));
	}

	#[test]
	fn system_values_and_defaults() {
		let dir = config_dir(None);
		let config = ConfigManager::new(dir.path()).unwrap();
		let system = config.system();

		assert_eq!(system.api.timeout, 10);
		assert_eq!(system.api.max_retries, 3);
		assert_eq!(system.api.glm.api_key.as_deref(), Some("${NICK_GEN_TEST_UNSET_KEY}"));
		assert_eq!(system.storage.data_dir, PathBuf::from("out"));
		assert_eq!(system.generation.style.as_deref(), Some("古风"));
		assert_eq!(system.generation.count, 20);
	}

	#[test]
	fn enabled_styles_and_validation() {
		let dir = config_dir(None);
		let config = ConfigManager::new(dir.path()).unwrap();

		assert_eq!(config.list_styles(), vec!["古风".to_string()]);
		assert!(config.validate_style("古风").is_ok());
		assert!(matches!(config.validate_style("二次元"), Err(ConfigError::InvalidStyle { .. })));
		assert!(matches!(config.validate_style("赛博"), Err(ConfigError::UnknownStyle(_))));
	}

	#[test]
	fn filter_config_falls_back_to_globals() {
		let dir = config_dir(None);
		let config = ConfigManager::new(dir.path()).unwrap();

		let ancient = config.filter_config("古风");
		assert!(ancient.forbid_duplicate_chars);
		assert_eq!(ancient.forbidden_combinations, vec![vec!["死".to_string(), "亡".to_string()]]);
		assert_eq!((ancient.length_min, ancient.length_max), (2, 4));

		let anime = config.filter_config("二次元");
		assert!(!anime.forbid_duplicate_chars);
		assert_eq!(anime.forbidden_combinations, vec![vec!["魔".to_string(), "法".to_string()]]);
		assert_eq!((anime.length_min, anime.length_max), (2, 5));
	}

	#[test]
	fn style_rules_collect_templates_and_tags() {
		let dir = config_dir(None);
		let config = ConfigManager::new(dir.path()).unwrap();
		let rules = config.style_rules("古风").unwrap();

		assert_eq!(rules.templates.len(), 2);
		assert!(rules.tags.has_tag_system());
		assert_eq!(rules.tags.conflicts.len(), 1);
		assert!(matches!(config.style_rules("赛博"), Err(ConfigError::UnknownStyle(_))));

		let categories = config.word_root_categories("古风");
		assert_eq!(categories[0].count_per_category, 25);
		assert_eq!(categories[1].count_per_category, 10);
		assert!(config.word_root_categories("二次元").is_empty());
	}

	#[test]
	fn prompts_are_optional() {
		let dir = config_dir(None);
		let config = ConfigManager::new(dir.path()).unwrap();
		assert_eq!(config.prompt_template("word_root_generation"), None);

		let dir = config_dir(Some("prompts:\n  word_root_generation:\n    template: 为{style_name}生成\n"));
		let config = ConfigManager::new(dir.path()).unwrap();
		assert_eq!(config.prompt_template("word_root_generation").as_deref(), Some("为{style_name}生成"));
	}

	#[test]
	fn env_vars_are_substituted() {
		let lookup = |name: &str| (name == "GLM_KEY").then(|| "secret".to_owned());
		assert_eq!(substitute_with("key: ${GLM_KEY}", lookup), "key: secret");
		assert_eq!(substitute_with("key: ${OTHER}", lookup), "key: ${OTHER}");
		assert_eq!(substitute_with("key: $GLM_KEY", lookup), "key: $GLM_KEY");
	}

	#[test]
	fn edited_styles_are_reloaded() {
		let dir = config_dir(None);
		let config = ConfigManager::new(dir.path()).unwrap();
		assert_eq!(config.style_rules("古风").unwrap().filter.length_max, 4);
		assert!(!config.check_and_reload().unwrap());

		let edited = STYLES
			.replace("length_max: 4", "length_max: 3")
			.replace(r#"古风: ["{意象}{建筑}", "{意象:冷色调}{建筑}"]"#, r#"古风: ["{建筑}{意象}"]"#);
		rewrite_later(&dir.path().join(STYLES_FILE), &edited, 60);

		let rules = config.style_rules("古风").unwrap();
		assert_eq!(rules.filter.length_max, 3);
		assert_eq!(rules.templates, vec!["{建筑}{意象}".to_string()]);
		assert!(!config.check_and_reload().unwrap());
	}

	#[test]
	fn broken_styles_keep_previous_rules() {
		let dir = config_dir(None);
		let config = ConfigManager::new(dir.path()).unwrap();
		let before = config.style_rules("古风").unwrap();

		rewrite_later(&dir.path().join(STYLES_FILE), "styles: [unclosed", 60);

		assert!(matches!(config.check_and_reload(), Err(ConfigError::ParseFailed { .. })));
		let after = config.style_rules("古风").unwrap();
		assert_eq!(after.templates, before.templates);
		assert_eq!(after.filter.length_max, 4);
		assert_eq!(config.list_styles(), vec!["古风".to_string()]);

		// Fixing the file is picked up again
		rewrite_later(&dir.path().join(STYLES_FILE), &STYLES.replace("length_max: 4", "length_max: 3"), 120);
		assert_eq!(config.style_rules("古风").unwrap().filter.length_max, 3);
	}
}
