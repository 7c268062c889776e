//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Crawl session tracking
//! - The URL queue backing the frontier
//! - Access records of fetched pages (used for dedup and incremental crawls)
//! - The document index written by the extraction pipeline
//! - Stored scripts and pending crawl requests

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    AccessStore, DocumentStore, QueueStore, RequestStore, ScriptStore, SessionStore,
    StorageError, StorageResult,
};

use crate::state::AccessStatus;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// The Unix epoch, used as "no known modification time"
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(0).single().unwrap_or_default()
}

pub(crate) fn to_millis(time: &DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(epoch)
}

/// A URL waiting in the frontier of a session
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Store identifier; `None` until the entry is inserted
    pub id: Option<i64>,
    pub session_id: String,
    pub url: String,
    pub parent_url: Option<String>,
    pub method: String,
    pub depth: u32,
    pub create_time: DateTime<Utc>,
    /// Last known modification time; the epoch when unknown
    pub last_modified: DateTime<Utc>,
}

impl QueueEntry {
    /// Creates a seed entry (depth 0, GET, no known modification time)
    pub fn new(session_id: &str, url: &str) -> Self {
        Self {
            id: None,
            session_id: session_id.to_string(),
            url: url.to_string(),
            parent_url: None,
            method: "GET".to_string(),
            depth: 0,
            create_time: Utc::now(),
            last_modified: epoch(),
        }
    }

    /// Creates an entry for a URL discovered on `parent_url`
    pub fn child(session_id: &str, url: &str, parent_url: &str, depth: u32) -> Self {
        Self {
            parent_url: Some(parent_url.to_string()),
            depth,
            ..Self::new(session_id, url)
        }
    }

    /// Returns true if a previous modification time is known
    pub fn has_last_modified(&self) -> bool {
        self.last_modified > epoch()
    }
}

/// The record of a successfully fetched URL
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub id: Option<i64>,
    pub session_id: String,
    pub url: String,
    pub parent_url: Option<String>,
    pub method: String,
    pub status: AccessStatus,
    pub http_status_code: u16,
    pub mime_type: Option<String>,
    pub content_length: u64,
    pub execution_time: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
    /// Name of the scraping rule that matched, if any
    pub rule: Option<String>,
    /// Number of documents written for this access
    pub document_count: u32,
}

/// A document stored in the index
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: i64,
    pub index: String,
    pub session_id: String,
    pub url: Option<String>,
    pub body: Map<String, Value>,
    pub indexed_at: DateTime<Utc>,
}

/// Represents a crawl session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub config_name: String,
    pub config_hash: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: SessionStatus,
}

/// Status of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl SessionStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A pending request to crawl a configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRequest {
    pub id: i64,
    pub config_path: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_roundtrip() {
        for status in &[
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Interrupted,
            SessionStatus::Failed,
        ] {
            let db_str = status.to_db_string();
            let parsed = SessionStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_session_status_invalid() {
        assert_eq!(SessionStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_new_queue_entry_defaults() {
        let entry = QueueEntry::new("s1", "https://example.com/");
        assert_eq!(entry.depth, 0);
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.last_modified, epoch());
        assert!(!entry.has_last_modified());
        assert!(entry.id.is_none());
    }

    #[test]
    fn test_child_queue_entry() {
        let entry = QueueEntry::child("s1", "https://example.com/a", "https://example.com/", 2);
        assert_eq!(entry.depth, 2);
        assert_eq!(entry.parent_url.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = from_millis(to_millis(&Utc::now()));
        assert_eq!(from_millis(to_millis(&now)), now);
        assert_eq!(from_millis(0), epoch());
    }
}
