use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque post identifier
///
/// Dumps carry numeric ids and string ids alike, both are kept in their
/// textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for PostId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// A single post record
///
/// URL and hashtag lists are kept as found in the dump: they may contain
/// duplicates and nulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub urls: Vec<Option<String>>,
    pub hashtags: Vec<Option<String>>,
}

impl Post {
    pub fn new(
        id: impl Into<PostId>,
        urls: Vec<Option<String>>,
        hashtags: Vec<Option<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            urls,
            hashtags,
        }
    }

    /// Non-null, non-empty URLs in first-seen order without duplicates
    pub fn distinct_urls(&self) -> Vec<&str> {
        distinct(&self.urls)
    }

    /// Non-null, non-empty hashtags in first-seen order without duplicates
    pub fn distinct_hashtags(&self) -> Vec<&str> {
        distinct(&self.hashtags)
    }
}

fn distinct(values: &[Option<String>]) -> Vec<&str> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .iter()
        .filter_map(|v| v.as_deref())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(*v))
        .collect()
}
