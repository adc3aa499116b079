//! Post dump input
//!
//! Dump files hold one JSON post per line. Files are picked from an input
//! directory by a regular expression on their name.

mod files;
mod reader;

pub use files::scan_input_files;
pub use reader::{open_dump, parse_post_line, PostReader};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while locating or reading dump files
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] regex::Error),
}
