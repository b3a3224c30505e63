use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info, warn};

use crate::error::Result;
use crate::io;

/// Figures written to the metadata log after each run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunMetadata {
	/// Names stored by the run.
	pub count: usize,
	/// Candidates produced by template expansion.
	pub candidates: usize,
	/// Candidates rejected by the filter chain.
	pub filtered: usize,
	/// Candidates that passed the filters but were not returned
	/// (duplicates, already known names, sampling surplus).
	pub unused: usize,
}

impl RunMetadata {
	fn rate(part: usize, whole: usize) -> f64 {
		if whole == 0 { 0.0 } else { part as f64 / whole as f64 * 100.0 }
	}

	/// `{timestamp} | count=.. | candidates=.. | filter_rate=..% | unused_rate=..%`
	pub fn to_line(&self, timestamp: &str) -> String {
		format!(
			"{timestamp} | count={} | candidates={} | filter_rate={:.1}% | unused_rate={:.1}%",
			self.count,
			self.candidates,
			Self::rate(self.filtered, self.candidates),
			Self::rate(self.unused, self.candidates)
		)
	}
}

/// Plain-text store of generated nicknames.
///
/// # Files
/// - `{base_dir}/{style}_names.txt`: one name per line, append only
/// - `{base_dir}/{style}_metadata.txt`: one line per generation run
#[derive(Debug, Clone)]
pub struct NameStorage {
	base_dir: PathBuf,
}

impl NameStorage {
	/// Creates the storage, creating `base_dir` if needed.
	pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
		let base_dir = io::normalize_folder(base_dir);
		fs::create_dir_all(&base_dir)?;
		Ok(Self { base_dir })
	}

	pub fn base_dir(&self) -> &Path {
		&self.base_dir
	}

	pub fn names_path(&self, style: &str) -> PathBuf {
		self.base_dir.join(format!("{style}_names.txt"))
	}

	pub fn metadata_path(&self, style: &str) -> PathBuf {
		self.base_dir.join(format!("{style}_metadata.txt"))
	}

	/// Appends names to the style file; returns how many were written.
	///
	/// An empty list leaves the filesystem untouched.
	pub fn append_names(&self, style: &str, names: &[String]) -> Result<usize> {
		if names.is_empty() {
			return Ok(0);
		}
		let written = io::append_lines(self.names_path(style), names)?;
		info!("[{style}] appended {written} names");
		Ok(written)
	}

	/// Appends one metadata line stamped with the current local time.
	pub fn write_metadata(&self, style: &str, metadata: &RunMetadata) -> Result<()> {
		let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
		self.write_metadata_at(style, metadata, &timestamp)
	}

	pub fn write_metadata_at(&self, style: &str, metadata: &RunMetadata, timestamp: &str) -> Result<()> {
		io::append_lines(self.metadata_path(style), [metadata.to_line(timestamp)])?;
		debug!("[{style}] metadata recorded");
		Ok(())
	}

	/// Every stored name of a style, in file order.
	fn read_names(&self, style: &str) -> Result<Vec<String>> {
		let path = self.names_path(style);
		if !path.exists() {
			return Ok(Vec::new());
		}
		Ok(io::read_lines(path)?)
	}

	/// The last `limit` names of a style, or all of them with `None`.
	pub fn list_names(&self, style: &str, limit: Option<usize>) -> Result<Vec<String>> {
		let mut names = self.read_names(style)?;
		if let Some(limit) = limit {
			let skip = names.len().saturating_sub(limit);
			names.drain(..skip);
		}
		Ok(names)
	}

	pub fn get_count(&self, style: &str) -> Result<usize> {
		let count = self.read_names(style)?.len();
		debug!("[{style}] {count} names stored");
		Ok(count)
	}

	/// Set of stored names, used to exclude them from new runs.
	pub fn existing_names(&self, style: &str) -> Result<HashSet<String>> {
		Ok(self.read_names(style)?.into_iter().collect())
	}

	/// Copies the names file of a style to `output`.
	///
	/// Returns `false` when the style has no names yet.
	pub fn export<P: AsRef<Path>>(&self, style: &str, output: P) -> Result<bool> {
		let source = self.names_path(style);
		if !source.exists() {
			warn!("[{style}] nothing to export, {} does not exist", source.display());
			return Ok(false);
		}
		fs::copy(&source, output.as_ref())?;
		info!("[{style}] exported to {}", output.as_ref().display());
		Ok(true)
	}

	/// Deletes every stored name of a style. Metadata is kept.
	pub fn clear(&self, style: &str) -> Result<bool> {
		let removed = io::remove_if_exists(self.names_path(style))?;
		if removed {
			warn!("[{style}] all names cleared");
		}
		Ok(removed)
	}
}
