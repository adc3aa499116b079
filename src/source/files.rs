use crate::source::SourceError;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lists the dump files in `directory` whose name matches `pattern`
///
/// The scan is not recursive. Files are returned sorted by path so runs over
/// the same directory process files in the same order.
pub fn scan_input_files(directory: &Path, pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    if !directory.is_dir() {
        return Err(SourceError::DirectoryNotFound(directory.to_path_buf()));
    }

    let pattern = Regex::new(pattern)?;
    let mut files = Vec::new();

    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if pattern.is_match(name) {
            files.push(entry.path());
        }
    }

    files.sort();
    debug!(count = files.len(), directory = %directory.display(), "Input files found");
    Ok(files)
}
