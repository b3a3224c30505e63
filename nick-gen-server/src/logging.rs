use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log file name prefix inside the log directory.
pub const LOG_FILE: &str = "app";

/// Rotated log files kept on disk, the current one included.
pub const MAX_LOG_FILES: usize = 5;

/// Directory of the log files, `NICK_GEN_LOG_DIR` or `logs`.
pub fn log_dir() -> String {
	std::env::var("NICK_GEN_LOG_DIR").unwrap_or_else(|_| "logs".to_owned())
}

/// Daily rotated `{log_dir}/app.YYYY-MM-DD.log`, keeping the last five files.
pub fn file_appender(log_dir: &Path) -> io::Result<RollingFileAppender> {
	std::fs::create_dir_all(log_dir)?;
	RollingFileAppender::builder()
		.rotation(Rotation::DAILY)
		.filename_prefix(LOG_FILE)
		.filename_suffix("log")
		.max_log_files(MAX_LOG_FILES)
		.build(log_dir)
		.map_err(io::Error::other)
}

/// Initializes logging: console plus rolling file, same level filter.
///
/// The level comes from `RUST_LOG` (default `info`). Records of the `log`
/// macros, used by the core and by actix, are forwarded to `tracing`.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the whole run.
pub fn init(log_dir: &Path) -> io::Result<WorkerGuard> {
	let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);
	let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let file_layer = tracing_subscriber::fmt::layer()
		.with_writer(file_writer)
		.with_ansi(false)
		.with_target(true)
		.with_filter(filter());
	let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout).with_filter(filter());

	let subscriber = tracing_subscriber::registry().with(file_layer).with(console_layer);
	tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;
	tracing_log::LogTracer::init().map_err(io::Error::other)?;

	Ok(guard)
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn file_appender_writes_into_the_log_directory() {
		let dir = tempfile::tempdir().unwrap();
		let log_dir = dir.path().join("logs");

		let mut appender = file_appender(&log_dir).unwrap();
		appender.write_all(b"server started\n").unwrap();
		appender.flush().unwrap();

		let files: Vec<_> = std::fs::read_dir(&log_dir).unwrap().map(|entry| entry.unwrap().path()).collect();
		assert_eq!(files.len(), 1);
		let name = files[0].file_name().unwrap().to_string_lossy().to_string();
		assert!(name.starts_with("app.") && name.ends_with(".log"), "{name}");
		assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "server started\n");
	}
}
