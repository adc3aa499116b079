//! Database schema definitions
//!
//! One table per sink plus the run log. `redirects.from_url` is the primary
//! key so a source URL can only ever be mapped once.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Every ingested post, as found in the dump
CREATE TABLE IF NOT EXISTS posts (
    post_id TEXT PRIMARY KEY,
    urls TEXT NOT NULL,
    hashtags TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

-- Resolved redirects, append-only
CREATE TABLE IF NOT EXISTS redirects (
    from_url TEXT PRIMARY KEY,
    to_url TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_redirects_to ON redirects(to_url);

-- Crawled page content keyed by resolved URL, headers as a JSON object
CREATE TABLE IF NOT EXISTS webpages (
    url TEXT PRIMARY KEY,
    content TEXT,
    title TEXT,
    text TEXT,
    status INTEGER,
    headers TEXT,
    fetched_at TEXT NOT NULL
);

-- Hashtag to resolved URL alignments
CREATE TABLE IF NOT EXISTS alignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hashtag TEXT NOT NULL,
    url TEXT NOT NULL,
    post_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alignments_hashtag ON alignments(hashtag);
CREATE INDEX IF NOT EXISTS idx_alignments_post ON alignments(post_id);

-- Audit trail: every hashtag/original URL pair of every post
CREATE TABLE IF NOT EXISTS unresolved_alignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hashtag TEXT NOT NULL,
    url TEXT NOT NULL,
    post_id TEXT NOT NULL,
    spam INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_unresolved_post ON unresolved_alignments(post_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in [
            "runs",
            "posts",
            "redirects",
            "webpages",
            "alignments",
            "unresolved_alignments",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
