use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use rand::Rng;
use serde::Serialize;

use crate::config::ConfigManager;
use crate::error::{PersistenceError, Result};
use crate::llm::{DisabledGenerator, GlmClient, TextGenerator};
use crate::model::generator::{GenerationStats, NicknameGenerator};
use crate::roots::{LlmRootSource, RootStore, YamlRootFiles};
use crate::storage::{NameStorage, RunMetadata};

/// Outcome of one generation request.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerationReport {
	pub style: String,
	pub names: Vec<String>,
	pub candidates: usize,
	pub filtered: usize,
	/// Names appended to storage by this run, 0 when not persisted.
	pub stored: usize,
	/// Names stored for the style after this run.
	pub total_stored: usize,
}

/// End-to-end nickname generation for configured styles.
///
/// # Flow
/// 1. Validate the style and resolve its rules from the configuration
/// 2. Load the names already stored, to exclude them
/// 3. Get the word roots (cache, file, or LLM)
/// 4. Generate, then append the new names and a metadata line
///
/// Steps 2 to 4 run under a per-style lock: concurrent requests for the same
/// style never return or store the same name twice.
pub struct NicknamePipeline {
	config: Arc<ConfigManager>,
	roots: RootStore,
	storage: NameStorage,
	generator: NicknameGenerator,
	style_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NicknamePipeline {
	pub fn new(config: Arc<ConfigManager>, roots: RootStore, storage: NameStorage) -> Self {
		Self { config, roots, storage, generator: NicknameGenerator::new(), style_locks: Mutex::new(HashMap::new()) }
	}

	/// The generation lock of a style, created on first use.
	fn style_lock(&self, style_name: &str) -> std::result::Result<Arc<Mutex<()>>, PersistenceError> {
		let mut locks = self.style_locks.lock().map_err(|_| PersistenceError::Poisoned(style_name.to_owned()))?;
		Ok(Arc::clone(locks.entry(style_name.to_owned()).or_default()))
	}

	/// Wires the default components from the configuration.
	///
	/// Roots and names live in `storage.data_dir`. Without a usable API key
	/// the pipeline still works: new roots then come from the configured examples.
	pub fn from_config(config: Arc<ConfigManager>) -> Result<Self> {
		let system = config.system();
		let llm: Arc<dyn TextGenerator> = match GlmClient::new(&system.api) {
			Ok(client) => Arc::new(client),
			Err(e) => {
				warn!("GLM client unavailable, word roots will fall back to examples: {e}");
				Arc::new(DisabledGenerator::new(e.to_string()))
			}
		};

		let data_dir = &system.storage.data_dir;
		let roots = RootStore::new(
			Box::new(YamlRootFiles::new(data_dir)?),
			Box::new(LlmRootSource::new(Arc::clone(&config), llm)),
		);
		let storage = NameStorage::new(data_dir)?;
		info!("pipeline ready, data directory: {}", data_dir.display());
		Ok(Self::new(config, roots, storage))
	}

	pub fn config(&self) -> &ConfigManager {
		&self.config
	}

	pub fn roots(&self) -> &RootStore {
		&self.roots
	}

	pub fn storage(&self) -> &NameStorage {
		&self.storage
	}

	/// Generates `count` names for a style and stores them.
	pub fn generate_for_style(&self, style_name: &str, count: usize) -> Result<GenerationReport> {
		self.generate(style_name, count, true)
	}

	/// Generates `count` names; stores them only when `persist` is set.
	///
	/// # Errors
	/// - Unknown or incomplete style
	/// - Root persistence or storage I/O failures
	pub fn generate(&self, style_name: &str, count: usize, persist: bool) -> Result<GenerationReport> {
		self.generate_with_rng(style_name, count, persist, &mut rand::rng())
	}

	pub fn generate_with_rng<R: Rng + ?Sized>(
		&self,
		style_name: &str,
		count: usize,
		persist: bool,
		rng: &mut R,
	) -> Result<GenerationReport> {
		info!("[{style_name}] generation started, target count: {count}");
		self.config.validate_style(style_name)?;
		let rules = self.config.style_rules(style_name)?;

		let lock = self.style_lock(style_name)?;
		let _guard = lock.lock().map_err(|_| PersistenceError::Poisoned(style_name.to_owned()))?;

		let existing = self.storage.existing_names(style_name)?;
		let roots = self.roots.get_roots(style_name)?;
		let generation = self.generator.run(&rules, &roots, count, &existing, rng);

		let stored = if persist && !generation.names.is_empty() {
			let stored = self.storage.append_names(style_name, &generation.names)?;
			self.storage.write_metadata(style_name, &run_metadata(&generation.stats))?;
			stored
		} else {
			0
		};

		let report = GenerationReport {
			style: style_name.to_owned(),
			candidates: generation.stats.candidates,
			filtered: generation.stats.filter.rejected(),
			stored,
			total_stored: existing.len() + stored,
			names: generation.names,
		};
		info!(
			"[{style_name}] generation finished: {} names, {} stored, {} in total",
			report.names.len(),
			report.stored,
			report.total_stored
		);
		Ok(report)
	}

	/// Theoretical candidate count of each template of a style.
	pub fn estimate(&self, style_name: &str) -> Result<BTreeMap<String, usize>> {
		let rules = self.config.style_rules(style_name)?;
		let roots = self.roots.get_roots(style_name)?;
		Ok(self.generator.estimate_combinations(&rules, &roots))
	}

	/// Replaces the word roots of a style; returns the new root count.
	pub fn regenerate_roots(&self, style_name: &str) -> Result<usize> {
		self.config.validate_style(style_name)?;
		let roots = self.roots.regenerate_roots(style_name)?;
		Ok(roots.values().map(Vec::len).sum())
	}
}

fn run_metadata(stats: &GenerationStats) -> RunMetadata {
	RunMetadata {
		count: stats.returned,
		candidates: stats.candidates,
		filtered: stats.filter.rejected(),
		unused: stats.filter.accepted.saturating_sub(stats.returned),
	}
}
