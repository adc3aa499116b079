use crate::model::{Post, PostId};

/// A post awaiting URL resolution
///
/// Candidates are built once during ingestion and never mutated. A partially
/// resolved candidate is replaced by a narrower copy via
/// [`AlignmentCandidate::with_urls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentCandidate {
    post_id: PostId,
    original_urls: Vec<String>,
    hashtags: Vec<String>,
}

impl AlignmentCandidate {
    pub fn new(post_id: PostId, original_urls: Vec<String>, hashtags: Vec<String>) -> Self {
        Self {
            post_id,
            original_urls,
            hashtags,
        }
    }

    /// Builds a candidate from a post
    ///
    /// Null and empty entries are dropped, duplicates are kept. Returns
    /// `None` unless at least one URL and one hashtag remain.
    pub fn from_post(post: &Post) -> Option<Self> {
        let urls: Vec<String> = post
            .urls
            .iter()
            .flatten()
            .filter(|u| !u.is_empty())
            .cloned()
            .collect();
        let hashtags: Vec<String> = post
            .hashtags
            .iter()
            .flatten()
            .filter(|h| !h.is_empty())
            .cloned()
            .collect();

        if urls.is_empty() || hashtags.is_empty() {
            return None;
        }

        Some(Self::new(post.id.clone(), urls, hashtags))
    }

    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    pub fn original_urls(&self) -> &[String] {
        &self.original_urls
    }

    pub fn hashtags(&self) -> &[String] {
        &self.hashtags
    }

    /// Returns a copy of this candidate restricted to the given URLs
    pub fn with_urls(&self, urls: Vec<String>) -> Self {
        Self {
            post_id: self.post_id.clone(),
            original_urls: urls,
            hashtags: self.hashtags.clone(),
        }
    }
}
