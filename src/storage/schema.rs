//! Database schema definitions
//!
//! All timestamps used for ordering or comparison are stored as epoch
//! milliseconds; session bookkeeping times are RFC 3339 text.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl sessions
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    config_name TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL
);

-- Frontier queue
CREATE TABLE IF NOT EXISTS url_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    url TEXT NOT NULL,
    parent_url TEXT,
    method TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    create_time INTEGER NOT NULL,
    last_modified INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_url_queue_session_time ON url_queue(session_id, create_time, id);
CREATE INDEX IF NOT EXISTS idx_url_queue_session_url ON url_queue(session_id, url);

-- Fetched URLs
CREATE TABLE IF NOT EXISTS access_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    url TEXT NOT NULL,
    parent_url TEXT,
    method TEXT NOT NULL,
    status TEXT NOT NULL,
    http_status_code INTEGER NOT NULL,
    mime_type TEXT,
    content_length INTEGER NOT NULL DEFAULT 0,
    execution_time INTEGER NOT NULL DEFAULT 0,
    last_modified INTEGER,
    create_time INTEGER NOT NULL,
    rule TEXT,
    document_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_access_results_session_url ON access_results(session_id, url);
CREATE INDEX IF NOT EXISTS idx_access_results_url ON access_results(url, create_time);

-- Extracted documents
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    index_name TEXT NOT NULL,
    session_id TEXT NOT NULL,
    url TEXT,
    body TEXT NOT NULL,
    indexed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_index_url ON documents(index_name, url);
CREATE INDEX IF NOT EXISTS idx_documents_index_session ON documents(index_name, session_id);

-- Stored scripts
CREATE TABLE IF NOT EXISTS scripts (
    id TEXT PRIMARY KEY,
    lang TEXT NOT NULL,
    source TEXT NOT NULL
);

-- Pending crawl requests
CREATE TABLE IF NOT EXISTS crawl_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    config_path TEXT NOT NULL,
    session_id TEXT,
    created_at INTEGER NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
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
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let tables = vec![
            "sessions",
            "url_queue",
            "access_results",
            "documents",
            "scripts",
            "crawl_requests",
        ];

        for table in tables {
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
