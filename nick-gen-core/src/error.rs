use std::path::PathBuf;

use thiserror::Error;

/// Result alias used by every fallible entry point of the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error of the crate.
///
/// Only the I/O edges (configuration, root persistence, name storage and
/// the LLM client) produce errors. Template expansion, filtering and
/// sampling always complete.
#[derive(Error, Debug)]
pub enum Error {
	#[error("config: {0}")]
	Config(#[from] ConfigError),

	#[error("persistence: {0}")]
	Persistence(#[from] PersistenceError),

	#[error("llm: {0}")]
	Llm(#[from] LlmError),

	#[error("storage: {0}")]
	Storage(#[from] std::io::Error),
}

/// Errors raised while loading the YAML configuration directory.
#[derive(Error, Debug)]
pub enum ConfigError {
	/// Configuration directory or a required file is missing.
	#[error("configuration file not found: {0}")]
	NotFound(PathBuf),

	#[error("failed to read {path}: {source}")]
	ReadFailed {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse {path}: {source}")]
	ParseFailed {
		path: PathBuf,
		#[source]
		source: serde_yaml_ng::Error,
	},

	#[error("style '{0}' is not configured")]
	UnknownStyle(String),

	/// Style exists but lacks one of the mandatory keys.
	#[error("style '{style}' is invalid: {reason}")]
	InvalidStyle { style: String, reason: String },

	#[error("configuration lock poisoned")]
	Poisoned,
}

impl ConfigError {
	pub(crate) fn read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::ReadFailed { path: path.into(), source }
	}

	pub(crate) fn parse_failed(path: impl Into<PathBuf>, source: serde_yaml_ng::Error) -> Self {
		Self::ParseFailed { path: path.into(), source }
	}
}

/// Errors raised by the root files (YAML document and binary snapshot).
#[derive(Error, Debug)]
pub enum PersistenceError {
	#[error("io error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid YAML in {path}: {source}")]
	Yaml {
		path: PathBuf,
		#[source]
		source: serde_yaml_ng::Error,
	},

	#[error("invalid snapshot {path}: {source}")]
	Snapshot {
		path: PathBuf,
		#[source]
		source: postcard::Error,
	},

	#[error("root cache lock poisoned for style '{0}'")]
	Poisoned(String),
}

impl PersistenceError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io { path: path.into(), source }
	}
}

/// Errors raised by the chat-completions client.
#[derive(Error, Debug)]
pub enum LlmError {
	#[error("API key is not set (config api.glm.api_key or GLM_API_KEY)")]
	MissingApiKey,

	#[error("request failed: {0}")]
	Request(#[from] reqwest::Error),

	#[error("provider returned an error: {0}")]
	Provider(String),

	#[error("unexpected response shape: {0}")]
	MalformedResponse(String),

	#[error("gave up after {attempts} attempts: {last}")]
	RetriesExhausted { attempts: u32, last: String },
}
