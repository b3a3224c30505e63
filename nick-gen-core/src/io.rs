use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use std::{env, fs, io};

/// Reads a text file and returns its non-empty lines, trimmed.
///
/// - Reads the entire file into memory
/// - Splits on `\n` / `\r\n`
pub(crate) fn read_lines<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let mut contents = String::new();
	File::open(filename)?.read_to_string(&mut contents)?;
	Ok(contents
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_owned)
		.collect())
}

/// Appends lines to a text file, creating it if needed.
pub(crate) fn append_lines<P, I, S>(filename: P, lines: I) -> io::Result<usize>
where
	P: AsRef<Path>,
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut file = OpenOptions::new().create(true).append(true).open(filename)?;
	let mut written = 0;
	for line in lines {
		writeln!(file, "{}", line.as_ref().trim())?;
		written += 1;
	}
	Ok(written)
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `data/古风_roots.yaml` + `"bin"` → `data/古风_roots.bin`
pub(crate) fn build_output_path<P: AsRef<Path>>(
	input_path: P,
	output_extension: &str,
) -> io::Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}

/// Extracts the base filename without extension.
///
/// Examples:
/// - `"./data/古风_roots.yaml"` → `"古风_roots"`
/// - `"古风_roots.yaml"` → `"古风_roots"`
pub(crate) fn get_filename<P: AsRef<Path>>(input_path: P) -> io::Result<String> {
	let stem = input_path
		.as_ref()
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no filename"))?;

	Ok(stem.to_string_lossy().to_string())
}

/// Normalize a folder path.
///
/// - `"."` or `"./"` resolves to the current working directory
/// - Other paths are returned as-is (not canonicalized)
pub(crate) fn normalize_folder<P: AsRef<Path>>(input: P) -> PathBuf {
	let input = input.as_ref();
	if input == Path::new(".") || input == Path::new("./") {
		env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
	} else {
		input.to_path_buf()
	}
}

/// Lists all files with a given extension in a directory.
///
/// Returns file names only (no paths). A missing directory yields an empty list.
pub(crate) fn list_files<P: AsRef<Path>>(dir: P, extension: &str) -> io::Result<Vec<String>> {
	let mut files = Vec::new();
	if !dir.as_ref().is_dir() {
		return Ok(files);
	}

	for entry in fs::read_dir(dir)? {
		let path = entry?.path();

		if path.is_file() && path.extension() == Some(std::ffi::OsStr::new(extension)) {
			if let Some(name) = path.file_name() {
				files.push(name.to_string_lossy().to_string());
			}
		}
	}

	files.sort();
	Ok(files)
}

/// Last modification time, `None` if the file is missing or the platform has none.
pub(crate) fn modified<P: AsRef<Path>>(path: P) -> Option<SystemTime> {
	fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Identity of a file's current content: modification time since the epoch
/// (seconds, nanoseconds) and length in bytes.
///
/// `None` if the file is missing or the platform has no modification time.
pub(crate) fn stamp<P: AsRef<Path>>(path: P) -> Option<(u64, u32, u64)> {
	let meta = fs::metadata(path).ok()?;
	let since_epoch = meta.modified().ok()?.duration_since(SystemTime::UNIX_EPOCH).ok()?;
	Some((since_epoch.as_secs(), since_epoch.subsec_nanos(), meta.len()))
}

/// Removes a file, treating "already absent" as success.
///
/// Returns `true` if a file was actually removed.
pub(crate) fn remove_if_exists<P: AsRef<Path>>(path: P) -> io::Result<bool> {
	match fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
		Err(e) => Err(e),
	}
}
