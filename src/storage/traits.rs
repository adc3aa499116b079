//! Storage traits and error types

use crate::model::{
    AlignmentRecord, Post, PostId, RedirectEntry, UnresolvedAlignmentRecord, WebPage,
};
use crate::storage::{RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence backend: the output sinks plus the persistent redirect tier
///
/// Bulk `store_*` calls are best-effort. An item that fails to persist is
/// logged and skipped, the returned count only includes stored items. An
/// `Err` is reserved for failures of the call as a whole (e.g. the database
/// is gone).
pub trait Storage: Send {
    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run as finished with the given status
    fn complete_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Sinks =====

    /// Stores posts, ignoring ids that are already present
    fn store_posts(&mut self, posts: &[Post]) -> StorageResult<usize>;

    /// Stores crawled pages, replacing earlier content for the same URL
    fn store_webpages(&mut self, pages: &[WebPage]) -> StorageResult<usize>;

    fn store_alignments(&mut self, records: &[AlignmentRecord]) -> StorageResult<usize>;

    fn store_unresolved_alignments(
        &mut self,
        records: &[UnresolvedAlignmentRecord],
    ) -> StorageResult<usize>;

    // ===== Redirects =====

    /// Looks up the persisted target of a source URL
    fn lookup_redirect(&self, from: &str) -> StorageResult<Option<String>>;

    /// Records a redirect unless `from` is already mapped
    ///
    /// Returns the authoritative target, which is the first target ever
    /// recorded for `from`.
    fn record_redirect(&mut self, from: &str, to: &str) -> StorageResult<String>;

    /// Records many redirects in one transaction
    ///
    /// Returns the authoritative entry for every redirect that could be
    /// persisted.
    fn record_redirects(&mut self, entries: &[RedirectEntry]) -> StorageResult<Vec<RedirectEntry>>;

    // ===== Statistics =====

    /// Alignments emitted for one post, ordered by hashtag then URL
    fn alignments_for_post(&self, post_id: &PostId) -> StorageResult<Vec<AlignmentRecord>>;

    fn count_posts(&self) -> StorageResult<u64>;

    fn count_redirects(&self) -> StorageResult<u64>;

    fn count_webpages(&self) -> StorageResult<u64>;

    fn count_alignments(&self) -> StorageResult<u64>;

    /// Counts audit records, optionally restricted to spam or non-spam
    fn count_unresolved_alignments(&self, spam: Option<bool>) -> StorageResult<u64>;

    /// Most aligned hashtags with their alignment counts, descending
    fn top_hashtags(&self, limit: usize) -> StorageResult<Vec<(String, u64)>>;
}
