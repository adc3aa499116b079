//! Remote batch-fetch boundary
//!
//! This module handles:
//! - The [`BatchFetcher`] seam the crawl driver talks to
//! - Typed fetch failures and their retry classification
//! - The HTTP client for the hosted query API
//! - Title and text extraction from fetched pages

mod html;
mod query_api;

pub use html::{summarize_html, PageSummary};
pub use query_api::{build_http_client, build_query, parse_response, QueryApiFetcher};

use crate::model::RedirectEntry;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

/// How a failed batch is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network trouble, retried once
    Transient,
    /// The response could not be decoded, retried once
    Deserialization,
    /// Anything else, logged at error level and not retried
    Unexpected,
}

/// Failure of a batch fetch
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to decode response: {0}")]
    Deserialization(String),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(_) | Self::Timeout(_) => FailureKind::Transient,
            Self::Deserialization(_) => FailureKind::Deserialization,
            Self::Unexpected(_) => FailureKind::Unexpected,
        }
    }
}

/// HTTP status and headers the service reported for one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub status: Option<u16>,
    /// Header values keyed by their sanitized name
    pub fields: BTreeMap<String, String>,
}

impl ResponseHeaders {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.fields.is_empty()
    }
}

/// Replaces every character outside `[A-Za-z0-9_]` with `_`
///
/// ```
/// use hashtag_crawler::remote::sanitize_header_key;
///
/// assert_eq!(sanitize_header_key("Content-Type"), "Content_Type");
/// assert_eq!(sanitize_header_key("x.cache hit"), "x_cache_hit");
/// ```
pub fn sanitize_header_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Outcome of one successful batch fetch
///
/// URLs missing from the redirect map are unresolved. Results may be partial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlResult {
    /// Page content keyed by the URL it was served from
    pub contents: HashMap<String, String>,

    /// Requested URL to the URL it finally landed on
    pub redirects: HashMap<String, String>,

    /// Status and headers keyed by the URL they were served from
    pub headers: HashMap<String, ResponseHeaders>,
}

impl CrawlResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.contents.insert(url.into(), content.into());
        self
    }

    pub fn with_redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.redirects.insert(from.into(), to.into());
        self
    }

    pub fn with_headers(mut self, url: impl Into<String>, headers: ResponseHeaders) -> Self {
        self.headers.insert(url.into(), headers);
        self
    }

    /// Target of `url` according to this result
    pub fn resolve(&self, url: &str) -> Option<&str> {
        self.redirects.get(url).map(String::as_str)
    }

    /// Redirects as entries, ordered by source URL
    pub fn redirect_entries(&self) -> Vec<RedirectEntry> {
        let mut entries: Vec<_> = self
            .redirects
            .iter()
            .map(|(from, to)| RedirectEntry::new(from.clone(), to.clone()))
            .collect();
        entries.sort_by(|a, b| a.from.cmp(&b.from));
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.redirects.is_empty() && self.headers.is_empty()
    }
}

/// Resolves a deduplicated set of URLs in one remote round-trip
#[async_trait]
pub trait BatchFetcher: Send + Sync {
    async fn fetch(&self, urls: &[String]) -> Result<CrawlResult, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            FetchError::Network("reset".into()).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            FetchError::Deserialization("eof".into()).kind(),
            FailureKind::Deserialization
        );
        assert_eq!(
            FetchError::Unexpected("403".into()).kind(),
            FailureKind::Unexpected
        );
    }

    #[test]
    fn test_crawl_result_entries_are_sorted() {
        let result = CrawlResult::new()
            .with_redirect("b", "y")
            .with_redirect("a", "x")
            .with_page("x", "<html></html>");

        assert_eq!(result.resolve("a"), Some("x"));
        assert_eq!(result.resolve("x"), None);
        assert_eq!(
            result.redirect_entries(),
            vec![RedirectEntry::new("a", "x"), RedirectEntry::new("b", "y")]
        );
        assert!(!result.is_empty());
    }
}
