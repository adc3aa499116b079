use crate::model::PostId;
use std::collections::BTreeMap;

/// A resolved redirect: `from` ultimately lands on `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedirectEntry {
    pub from: String,
    pub to: String,
}

impl RedirectEntry {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Crawled content of a resolved URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebPage {
    pub url: String,
    /// `None` when only the response headers were reported
    pub content: Option<String>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub status: Option<u16>,
    /// Response headers with keys reduced to word characters
    pub headers: BTreeMap<String, String>,
}

/// Output tuple: a hashtag aligned with the URL its post links to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlignmentRecord {
    pub hashtag: String,
    pub url: String,
    pub post_id: PostId,
}

/// Audit tuple emitted for every (hashtag, original URL) pair of every post
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnresolvedAlignmentRecord {
    pub hashtag: String,
    pub url: String,
    pub post_id: PostId,
    pub spam: bool,
}
