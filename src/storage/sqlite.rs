//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::model::{
    AlignmentRecord, Post, PostId, RedirectEntry, UnresolvedAlignmentRecord, WebPage,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use crate::CrawlerError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use tracing::warn;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> Result<Self, CrawlerError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, CrawlerError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Runs `insert` for every item inside one transaction
///
/// Failing items are logged and skipped. Returns the number of rows written.
fn store_each<T>(
    conn: &mut Connection,
    sink: &str,
    items: &[T],
    mut insert: impl FnMut(&Transaction<'_>, &T) -> StorageResult<usize>,
) -> StorageResult<usize> {
    let tx = conn.transaction()?;
    let mut stored = 0;

    for (index, item) in items.iter().enumerate() {
        match insert(&tx, item) {
            Ok(rows) => stored += rows,
            Err(e) => warn!(sink, index, error = %e, "Failed to store item, skipping"),
        }
    }

    tx.commit()?;
    Ok(stored)
}

fn insert_redirect(tx: &Transaction<'_>, from: &str, to: &str) -> StorageResult<String> {
    tx.execute(
        "INSERT OR IGNORE INTO redirects (from_url, to_url, recorded_at) VALUES (?1, ?2, ?3)",
        params![from, to, Utc::now().to_rfc3339()],
    )?;
    let authoritative: String = tx.query_row(
        "SELECT to_url FROM redirects WHERE from_url = ?1",
        params![from],
        |row| row.get(0),
    )?;
    Ok(authoritative)
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
        )?;

        let run = stmt
            .query_row([], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    config_hash: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Running),
                })
            })
            .optional()?;

        Ok(run)
    }

    fn complete_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Sinks =====

    fn store_posts(&mut self, posts: &[Post]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        store_each(&mut self.conn, "posts", posts, |tx, post| {
            let urls = serde_json::to_string(&post.urls)?;
            let hashtags = serde_json::to_string(&post.hashtags)?;
            Ok(tx.execute(
                "INSERT OR IGNORE INTO posts (post_id, urls, hashtags, stored_at) VALUES (?1, ?2, ?3, ?4)",
                params![post.id.as_str(), urls, hashtags, now],
            )?)
        })
    }

    fn store_webpages(&mut self, pages: &[WebPage]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        store_each(&mut self.conn, "webpages", pages, |tx, page| {
            let headers = if page.headers.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&page.headers)?)
            };
            Ok(tx.execute(
                "INSERT OR REPLACE INTO webpages (url, content, title, text, status, headers, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![page.url, page.content, page.title, page.text, page.status, headers, now],
            )?)
        })
    }

    fn store_alignments(&mut self, records: &[AlignmentRecord]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        store_each(&mut self.conn, "alignments", records, |tx, record| {
            Ok(tx.execute(
                "INSERT INTO alignments (hashtag, url, post_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![record.hashtag, record.url, record.post_id.as_str(), now],
            )?)
        })
    }

    fn store_unresolved_alignments(
        &mut self,
        records: &[UnresolvedAlignmentRecord],
    ) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        store_each(&mut self.conn, "unresolved_alignments", records, |tx, record| {
            Ok(tx.execute(
                "INSERT INTO unresolved_alignments (hashtag, url, post_id, spam, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.hashtag,
                    record.url,
                    record.post_id.as_str(),
                    record.spam,
                    now
                ],
            )?)
        })
    }

    // ===== Redirects =====

    fn lookup_redirect(&self, from: &str) -> StorageResult<Option<String>> {
        let to = self
            .conn
            .query_row(
                "SELECT to_url FROM redirects WHERE from_url = ?1",
                params![from],
                |row| row.get(0),
            )
            .optional()?;
        Ok(to)
    }

    fn record_redirect(&mut self, from: &str, to: &str) -> StorageResult<String> {
        let tx = self.conn.transaction()?;
        let authoritative = insert_redirect(&tx, from, to)?;
        tx.commit()?;
        Ok(authoritative)
    }

    fn record_redirects(&mut self, entries: &[RedirectEntry]) -> StorageResult<Vec<RedirectEntry>> {
        let mut recorded = Vec::with_capacity(entries.len());
        store_each(&mut self.conn, "redirects", entries, |tx, entry| {
            let to = insert_redirect(tx, &entry.from, &entry.to)?;
            recorded.push(RedirectEntry::new(entry.from.clone(), to));
            Ok(1)
        })?;
        Ok(recorded)
    }

    // ===== Statistics =====

    fn alignments_for_post(&self, post_id: &PostId) -> StorageResult<Vec<AlignmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT hashtag, url FROM alignments WHERE post_id = ?1 ORDER BY hashtag, url, id",
        )?;

        let records = stmt
            .query_map(params![post_id.as_str()], |row| {
                Ok(AlignmentRecord {
                    hashtag: row.get(0)?,
                    url: row.get(1)?,
                    post_id: post_id.clone(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn count_posts(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM posts")
    }

    fn count_redirects(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM redirects")
    }

    fn count_webpages(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM webpages")
    }

    fn count_alignments(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM alignments")
    }

    fn count_unresolved_alignments(&self, spam: Option<bool>) -> StorageResult<u64> {
        let count: i64 = match spam {
            Some(flag) => self.conn.query_row(
                "SELECT COUNT(*) FROM unresolved_alignments WHERE spam = ?1",
                params![flag],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM unresolved_alignments",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count as u64)
    }

    fn top_hashtags(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT hashtag, COUNT(*) AS count FROM alignments
             GROUP BY hashtag ORDER BY count DESC, hashtag ASC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment(hashtag: &str, url: &str, post: &str) -> AlignmentRecord {
        AlignmentRecord {
            hashtag: hashtag.to_string(),
            url: url.to_string(),
            post_id: PostId::from(post),
        }
    }

    #[test]
    fn test_create_and_complete_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.get_latest_run().unwrap().is_none());

        let run_id = storage.create_run("abc123").unwrap();
        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        storage.complete_run(run_id, RunStatus::Completed).unwrap();
        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_complete_unknown_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.complete_run(99, RunStatus::Completed),
            Err(StorageError::RunNotFound(99))
        ));
    }

    #[test]
    fn test_record_redirect_is_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        assert_eq!(storage.record_redirect("u1", "v1").unwrap(), "v1");
        assert_eq!(storage.record_redirect("u1", "v1").unwrap(), "v1");
        assert_eq!(storage.count_redirects().unwrap(), 1);
        assert_eq!(storage.lookup_redirect("u1").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn test_record_redirect_keeps_first_target() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        storage.record_redirect("u1", "v1").unwrap();
        assert_eq!(storage.record_redirect("u1", "other").unwrap(), "v1");
        assert_eq!(storage.lookup_redirect("u1").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn test_record_redirects_bulk() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.record_redirect("a", "first").unwrap();

        let recorded = storage
            .record_redirects(&[RedirectEntry::new("a", "second"), RedirectEntry::new("b", "c")])
            .unwrap();

        assert_eq!(
            recorded,
            vec![RedirectEntry::new("a", "first"), RedirectEntry::new("b", "c")]
        );
        assert_eq!(storage.count_redirects().unwrap(), 2);
    }

    #[test]
    fn test_lookup_missing_redirect() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.lookup_redirect("nowhere").unwrap().is_none());
    }

    #[test]
    fn test_store_posts_ignores_duplicates() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let post = Post::new(
            1u64,
            vec![Some("http://a".to_string()), None],
            vec![Some("tag".to_string())],
        );

        assert_eq!(storage.store_posts(&[post.clone(), post]).unwrap(), 1);
        assert_eq!(storage.count_posts().unwrap(), 1);
    }

    #[test]
    fn test_store_webpages_replaces_content() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let page = |content: &str| WebPage {
            url: "http://v".to_string(),
            content: Some(content.to_string()),
            ..WebPage::default()
        };

        storage.store_webpages(&[page("old")]).unwrap();
        storage.store_webpages(&[page("new")]).unwrap();
        assert_eq!(storage.count_webpages().unwrap(), 1);

        let content: String = storage
            .conn
            .query_row("SELECT content FROM webpages WHERE url = 'http://v'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(content, "new");
    }

    #[test]
    fn test_store_webpages_keeps_status_and_headers() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let pages = [
            WebPage {
                url: "http://v".to_string(),
                content: Some("<html></html>".to_string()),
                status: Some(200),
                headers: [("Content_Type".to_string(), "text/html".to_string())]
                    .into_iter()
                    .collect(),
                ..WebPage::default()
            },
            WebPage {
                url: "http://gone".to_string(),
                status: Some(404),
                ..WebPage::default()
            },
        ];

        assert_eq!(storage.store_webpages(&pages).unwrap(), 2);

        let (status, headers): (Option<u16>, Option<String>) = storage
            .conn
            .query_row(
                "SELECT status, headers FROM webpages WHERE url = 'http://v'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, Some(200));
        assert_eq!(headers.as_deref(), Some(r#"{"Content_Type":"text/html"}"#));

        let (content, status, headers): (Option<String>, Option<u16>, Option<String>) = storage
            .conn
            .query_row(
                "SELECT content, status, headers FROM webpages WHERE url = 'http://gone'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!((content, status, headers), (None, Some(404), None));
    }

    #[test]
    fn test_store_alignments_and_top_hashtags() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let stored = storage
            .store_alignments(&[
                alignment("rust", "http://v1", "1"),
                alignment("rust", "http://v2", "2"),
                alignment("go", "http://v1", "1"),
            ])
            .unwrap();

        assert_eq!(stored, 3);
        assert_eq!(storage.count_alignments().unwrap(), 3);
        assert_eq!(
            storage.alignments_for_post(&PostId::from("1")).unwrap(),
            vec![alignment("go", "http://v1", "1"), alignment("rust", "http://v1", "1")]
        );
        assert_eq!(
            storage.top_hashtags(1).unwrap(),
            vec![("rust".to_string(), 2)]
        );
    }

    #[test]
    fn test_failing_item_is_skipped() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON alignments
                 WHEN NEW.hashtag = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let stored = storage
            .store_alignments(&[
                alignment("good", "u", "1"),
                alignment("bad", "u", "1"),
                alignment("fine", "u", "1"),
            ])
            .unwrap();

        assert_eq!(stored, 2);
        assert_eq!(storage.count_alignments().unwrap(), 2);
    }

    #[test]
    fn test_count_unresolved_by_spam_flag() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = |spam| UnresolvedAlignmentRecord {
            hashtag: "h".to_string(),
            url: "u".to_string(),
            post_id: PostId::from("p"),
            spam,
        };

        storage
            .store_unresolved_alignments(&[record(true), record(false), record(false)])
            .unwrap();

        assert_eq!(storage.count_unresolved_alignments(None).unwrap(), 3);
        assert_eq!(storage.count_unresolved_alignments(Some(true)).unwrap(), 1);
        assert_eq!(storage.count_unresolved_alignments(Some(false)).unwrap(), 2);
    }
}
