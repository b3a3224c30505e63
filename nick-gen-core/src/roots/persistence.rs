use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::io;
use crate::model::word_root::{RawRoot, RootMap, count_roots, normalize_roots};

const ROOT_FILE_SUFFIX: &str = "_roots";

/// Backing store of the word roots of every style.
///
/// Absence of roots for a style is not an error: `load` returns `None` and
/// the caller generates fresh roots.
pub trait RootPersistence: Send + Sync {
	fn load(&self, style_name: &str) -> Result<Option<RootMap>, PersistenceError>;

	fn save(&self, style_name: &str, roots: &RootMap) -> Result<(), PersistenceError>;

	/// Removes every persisted representation of the style's roots.
	fn remove(&self, style_name: &str) -> Result<(), PersistenceError>;

	/// Styles that currently have persisted roots.
	fn stored_styles(&self) -> Result<Vec<String>, PersistenceError>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct RootFileMetadata {
	style: String,
	generated_at: String,
	total_count: usize,
}

#[derive(Serialize, Debug)]
struct RootFileOut<'a> {
	metadata: RootFileMetadata,
	categories: &'a RootMap,
}

/// Binary snapshot, tied to the exact YAML content it was built from.
#[derive(Serialize, Debug)]
struct SnapshotOut<'a> {
	source: SourceStamp,
	roots: &'a RootMap,
}

#[derive(Deserialize, Debug)]
struct SnapshotIn {
	source: SourceStamp,
	roots: RootMap,
}

/// Modification time and length of the YAML file behind a snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
struct SourceStamp {
	modified_secs: u64,
	modified_nanos: u32,
	len: u64,
}

impl SourceStamp {
	fn of(path: &Path) -> Option<Self> {
		io::stamp(path).map(|(modified_secs, modified_nanos, len)| Self { modified_secs, modified_nanos, len })
	}
}

#[derive(Deserialize, Debug, Default)]
struct RootFileIn {
	#[serde(default)]
	categories: BTreeMap<String, Vec<RawRoot>>,
}

/// Human-editable YAML root files, one per style, with a binary snapshot.
///
/// # Layout
/// - `{data_dir}/{style}_roots.yaml`: `metadata` + `categories`, the source of truth
/// - `{data_dir}/{style}_roots.bin`: `postcard` snapshot of the normalized roots
///
/// The snapshot records the modification time and length of the YAML file
/// it was built from and is only trusted while both still match exactly, so
/// any replacement of the YAML is picked up, even one with an older mtime.
#[derive(Debug, Clone)]
pub struct YamlRootFiles {
	data_dir: PathBuf,
}

impl YamlRootFiles {
	/// Creates the store, creating `data_dir` if needed.
	pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, PersistenceError> {
		let data_dir = io::normalize_folder(data_dir);
		fs::create_dir_all(&data_dir).map_err(|e| PersistenceError::io(&data_dir, e))?;
		Ok(Self { data_dir })
	}

	pub fn yaml_path(&self, style_name: &str) -> PathBuf {
		self.data_dir.join(format!("{style_name}{ROOT_FILE_SUFFIX}.yaml"))
	}

	fn snapshot_path(&self, style_name: &str) -> Result<PathBuf, PersistenceError> {
		let yaml = self.yaml_path(style_name);
		io::build_output_path(&yaml, "bin").map_err(|e| PersistenceError::io(&yaml, e))
	}

	/// Loads the snapshot if it was built from the current YAML content.
	fn load_snapshot(&self, style_name: &str, yaml: &Path) -> Result<Option<RootMap>, PersistenceError> {
		let snapshot = self.snapshot_path(style_name)?;
		let Some(current) = SourceStamp::of(yaml) else {
			return Ok(None);
		};
		if !snapshot.exists() {
			return Ok(None);
		}

		let bytes = fs::read(&snapshot).map_err(|e| PersistenceError::io(&snapshot, e))?;
		match postcard::from_bytes::<SnapshotIn>(&bytes) {
			Ok(decoded) if decoded.source == current => Ok(Some(decoded.roots)),
			Ok(_) => {
				debug!("[{style_name}] root snapshot is out of date with {}", yaml.display());
				Ok(None)
			}
			Err(e) => {
				warn!("[{style_name}] ignoring unreadable root snapshot {}: {e}", snapshot.display());
				Ok(None)
			}
		}
	}

	/// Best effort: a missing snapshot only costs a YAML parse next time.
	///
	/// `source` is the stamp of the YAML file `roots` were read from or written to.
	fn write_snapshot(&self, style_name: &str, source: Option<SourceStamp>, roots: &RootMap) {
		let Some(source) = source else {
			warn!("[{style_name}] no modification time for the root file, snapshot skipped");
			return;
		};
		let written = self.snapshot_path(style_name).and_then(|path| {
			let bytes = postcard::to_stdvec(&SnapshotOut { source, roots })
				.map_err(|source| PersistenceError::Snapshot { path: path.clone(), source })?;
			fs::write(&path, bytes).map_err(|e| PersistenceError::io(&path, e))
		});
		if let Err(e) = written {
			warn!("[{style_name}] failed to write root snapshot: {e}");
		}
	}
}

impl RootPersistence for YamlRootFiles {
	fn load(&self, style_name: &str) -> Result<Option<RootMap>, PersistenceError> {
		let yaml = self.yaml_path(style_name);
		if !yaml.exists() {
			return Ok(None);
		}

		if let Some(roots) = self.load_snapshot(style_name, &yaml)? {
			debug!("[{style_name}] loaded {} categories from snapshot", roots.len());
			return Ok(Some(roots));
		}

		let source = SourceStamp::of(&yaml);
		let content = fs::read_to_string(&yaml).map_err(|e| PersistenceError::io(&yaml, e))?;
		let file: RootFileIn = if content.trim().is_empty() {
			RootFileIn::default()
		} else {
			serde_yaml_ng::from_str(&content).map_err(|source| PersistenceError::Yaml { path: yaml.clone(), source })?
		};

		let roots = normalize_roots(style_name, file.categories);
		debug!("[{style_name}] loaded {} categories from {}", roots.len(), yaml.display());
		self.write_snapshot(style_name, source, &roots);
		Ok(Some(roots))
	}

	fn save(&self, style_name: &str, roots: &RootMap) -> Result<(), PersistenceError> {
		let yaml = self.yaml_path(style_name);
		let document = RootFileOut {
			metadata: RootFileMetadata {
				style: style_name.to_owned(),
				generated_at: Local::now().to_rfc3339(),
				total_count: count_roots(roots),
			},
			categories: roots,
		};

		let content = serde_yaml_ng::to_string(&document)
			.map_err(|source| PersistenceError::Yaml { path: yaml.clone(), source })?;
		fs::write(&yaml, content).map_err(|e| PersistenceError::io(&yaml, e))?;
		self.write_snapshot(style_name, SourceStamp::of(&yaml), roots);

		info!("[{style_name}] word roots saved to {}", yaml.display());
		Ok(())
	}

	fn remove(&self, style_name: &str) -> Result<(), PersistenceError> {
		let yaml = self.yaml_path(style_name);
		let snapshot = self.snapshot_path(style_name)?;

		if io::remove_if_exists(&yaml).map_err(|e| PersistenceError::io(&yaml, e))? {
			info!("[{style_name}] removed root file {}", yaml.display());
		}
		io::remove_if_exists(&snapshot).map_err(|e| PersistenceError::io(&snapshot, e))?;
		Ok(())
	}

	fn stored_styles(&self) -> Result<Vec<String>, PersistenceError> {
		let files = io::list_files(&self.data_dir, "yaml").map_err(|e| PersistenceError::io(&self.data_dir, e))?;
		let mut styles = Vec::new();
		for file in files {
			let stem = io::get_filename(&file).map_err(|e| PersistenceError::io(&self.data_dir, e))?;
			if let Some(style) = stem.strip_suffix(ROOT_FILE_SUFFIX) {
				styles.push(style.to_owned());
			}
		}
		Ok(styles)
	}
}
