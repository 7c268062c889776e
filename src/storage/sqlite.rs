//! SQLite storage implementation
//!
//! One connection guarded by a mutex backs every store trait, so a single
//! `Arc<SqliteStorage>` can be shared between all crawl workers.

use crate::state::AccessStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    AccessStore, DocumentStore, QueueStore, RequestStore, ScriptStore, SessionStore,
    StorageError, StorageResult,
};
use crate::storage::{
    from_millis, to_millis, AccessRecord, CrawlRequest, QueueEntry, SessionRecord,
    SessionStatus, StoredDocument,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: Some(row.get(0)?),
        session_id: row.get(1)?,
        url: row.get(2)?,
        parent_url: row.get(3)?,
        method: row.get(4)?,
        depth: row.get(5)?,
        create_time: from_millis(row.get(6)?),
        last_modified: from_millis(row.get(7)?),
    })
}

fn access_record_from_row(row: &Row<'_>) -> rusqlite::Result<AccessRecord> {
    Ok(AccessRecord {
        id: Some(row.get(0)?),
        session_id: row.get(1)?,
        url: row.get(2)?,
        parent_url: row.get(3)?,
        method: row.get(4)?,
        status: AccessStatus::from_db_string(&row.get::<_, String>(5)?)
            .unwrap_or(AccessStatus::Processed),
        http_status_code: row.get(6)?,
        mime_type: row.get(7)?,
        content_length: row.get::<_, i64>(8)?.max(0) as u64,
        execution_time: row.get::<_, i64>(9)?.max(0) as u64,
        last_modified: row.get::<_, Option<i64>>(10)?.map(from_millis),
        create_time: from_millis(row.get(11)?),
        rule: row.get(12)?,
        document_count: row.get(13)?,
    })
}

const QUEUE_COLUMNS: &str =
    "id, session_id, url, parent_url, method, depth, create_time, last_modified";

const ACCESS_COLUMNS: &str = "id, session_id, url, parent_url, method, status, http_status_code,
     mime_type, content_length, execution_time, last_modified, create_time, rule, document_count";

impl SessionStore for SqliteStorage {
    fn create_session(
        &self,
        session_id: &str,
        config_name: &str,
        config_hash: &str,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sessions (session_id, config_name, config_hash, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                config_name,
                config_hash,
                now,
                SessionStatus::Running.to_db_string()
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                "SELECT session_id, config_name, config_hash, started_at, finished_at, status
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionRecord {
                        session_id: row.get(0)?,
                        config_name: row.get(1)?,
                        config_hash: row.get(2)?,
                        started_at: row.get(3)?,
                        finished_at: row.get(4)?,
                        status: SessionStatus::from_db_string(&row.get::<_, String>(5)?)
                            .unwrap_or(SessionStatus::Running),
                    })
                },
            )
            .optional()?;

        session.ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))
    }

    fn finish_session(&self, session_id: &str, status: SessionStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn()?.execute(
            "UPDATE sessions SET status = ?1, finished_at = ?2 WHERE session_id = ?3",
            params![status.to_db_string(), now, session_id],
        )?;
        if updated == 0 {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }
}

impl QueueStore for SqliteStorage {
    fn insert_queue_entries(&self, entries: &[QueueEntry]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO url_queue (session_id, url, parent_url, method, depth, create_time, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.session_id,
                    entry.url,
                    entry.parent_url,
                    entry.method,
                    entry.depth,
                    to_millis(&entry.create_time),
                    to_millis(&entry.last_modified),
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn oldest_queue_entries(
        &self,
        session_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<QueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM url_queue WHERE session_id = ?1 ORDER BY create_time, id LIMIT ?2",
            QUEUE_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![session_id, limit as i64], queue_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn delete_queue_entry(&self, session_id: &str, id: i64) -> StorageResult<bool> {
        let deleted = self.conn()?.execute(
            "DELETE FROM url_queue WHERE session_id = ?1 AND id = ?2",
            params![session_id, id],
        )?;
        Ok(deleted == 1)
    }

    fn queue_entry_exists(&self, session_id: &str, url: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM url_queue WHERE session_id = ?1 AND url = ?2 LIMIT 1",
                params![session_id, url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn delete_queue_entries_by_url(&self, session_id: &str, url: &str) -> StorageResult<usize> {
        let deleted = self.conn()?.execute(
            "DELETE FROM url_queue WHERE session_id = ?1 AND url = ?2",
            params![session_id, url],
        )?;
        Ok(deleted)
    }

    fn delete_session_queue(&self, session_id: &str) -> StorageResult<usize> {
        let deleted = self.conn()?.execute(
            "DELETE FROM url_queue WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(deleted)
    }

    fn count_queue_entries(&self, session_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM url_queue WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl AccessStore for SqliteStorage {
    fn insert_access_record(&self, record: &AccessRecord) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO access_results (session_id, url, parent_url, method, status, http_status_code,
             mime_type, content_length, execution_time, last_modified, create_time, rule, document_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.session_id,
                record.url,
                record.parent_url,
                record.method,
                record.status.to_db_string(),
                record.http_status_code,
                record.mime_type,
                record.content_length as i64,
                record.execution_time as i64,
                record.last_modified.as_ref().map(to_millis),
                to_millis(&record.create_time),
                record.rule,
                record.document_count,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn access_record_exists(&self, session_id: &str, url: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM access_results WHERE session_id = ?1 AND url = ?2 LIMIT 1",
                params![session_id, url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn latest_access_record(&self, url: &str) -> StorageResult<Option<AccessRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM access_results WHERE url = ?1
                     ORDER BY create_time DESC, id DESC LIMIT 1",
                    ACCESS_COLUMNS
                ),
                params![url],
                access_record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn session_access_records(&self, session_id: &str) -> StorageResult<Vec<AccessRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM access_results WHERE session_id = ?1 ORDER BY id",
            ACCESS_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![session_id], access_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn delete_session_access_records(&self, session_id: &str) -> StorageResult<usize> {
        let deleted = self.conn()?.execute(
            "DELETE FROM access_results WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(deleted)
    }
}

impl DocumentStore for SqliteStorage {
    fn bulk_index(
        &self,
        index: &str,
        session_id: &str,
        documents: &[Map<String, Value>],
    ) -> StorageResult<usize> {
        let now = to_millis(&Utc::now());
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (index_name, session_id, url, body, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for document in documents {
                let url = document.get("url").and_then(Value::as_str);
                let body = serde_json::to_string(document)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                stmt.execute(params![index, session_id, url, body, now])?;
            }
        }
        tx.commit()?;
        Ok(documents.len())
    }

    fn delete_by_url(&self, index: &str, url: &str) -> StorageResult<usize> {
        let deleted = self.conn()?.execute(
            "DELETE FROM documents WHERE index_name = ?1 AND url = ?2",
            params![index, url],
        )?;
        Ok(deleted)
    }

    fn find_by_url(&self, index: &str, url: &str) -> StorageResult<Vec<StoredDocument>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, index_name, session_id, url, body, indexed_at
             FROM documents WHERE index_name = ?1 AND url = ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![index, url], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, index, session_id, url, body, indexed_at)| {
                let body: Map<String, Value> = serde_json::from_str(&body)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(StoredDocument {
                    id,
                    index,
                    session_id,
                    url,
                    body,
                    indexed_at: from_millis(indexed_at),
                })
            })
            .collect()
    }

    fn count_documents(&self, index: &str) -> StorageResult<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM documents WHERE index_name = ?1",
            params![index],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_session_documents(&self, index: &str, session_id: &str) -> StorageResult<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM documents WHERE index_name = ?1 AND session_id = ?2",
            params![index, session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl ScriptStore for SqliteStorage {
    fn put_script(&self, id: &str, lang: &str, source: &str) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO scripts (id, lang, source) VALUES (?1, ?2, ?3)",
            params![id, lang, source],
        )?;
        Ok(())
    }

    fn get_script(&self, id: &str) -> StorageResult<Option<(String, String)>> {
        let conn = self.conn()?;
        let script = conn
            .query_row(
                "SELECT lang, source FROM scripts WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(script)
    }
}

impl RequestStore for SqliteStorage {
    fn enqueue_request(&self, config_path: &str, session_id: Option<&str>) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO crawl_requests (config_path, session_id, created_at) VALUES (?1, ?2, ?3)",
            params![config_path, session_id, to_millis(&Utc::now())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn oldest_requests(&self, limit: usize) -> StorageResult<Vec<CrawlRequest>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, config_path, session_id, created_at FROM crawl_requests
             ORDER BY created_at, id LIMIT ?1",
        )?;
        let requests = stmt
            .query_map(params![limit as i64], |row| {
                Ok(CrawlRequest {
                    id: row.get(0)?,
                    config_path: row.get(1)?,
                    session_id: row.get(2)?,
                    created_at: from_millis(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    fn delete_request(&self, id: i64) -> StorageResult<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM crawl_requests WHERE id = ?1", params![id])?;
        Ok(deleted == 1)
    }
}
