//! Hashtag-Crawler: hashtag/URL alignment over a rate-limited crawl API
//!
//! This crate ingests dumps of social-media posts, extracts (hashtag, URL)
//! candidates, resolves every URL through a remote batch-fetch service under a
//! strict hourly quota, and persists redirects, page content and the resulting
//! hashtag alignments.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod remote;
pub mod scheduler;
pub mod source;
pub mod storage;

use thiserror::Error;

/// Main error type for crawler operations
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Post source error: {0}")]
    Source(#[from] source::SourceError),

    #[error("Remote fetch error: {0}")]
    Fetch(#[from] remote::FetchError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid file pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::Coordinator;
pub use model::{AlignmentCandidate, AlignmentRecord, Post, PostId, UnresolvedAlignmentRecord};
pub use scheduler::{RateLimitedScheduler, RateLimitedTask};
