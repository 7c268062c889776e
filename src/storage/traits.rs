//! Storage traits and error types
//!
//! This module defines the trait interfaces the crawler needs from its
//! backing store. Every method takes `&self`: stores are shared between
//! concurrent workers and must serialize access internally.

use crate::storage::{
    AccessRecord, CrawlRequest, QueueEntry, SessionRecord, SessionStatus, StoredDocument,
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Crawl session bookkeeping
pub trait SessionStore: Send + Sync {
    /// Creates a new running session
    fn create_session(
        &self,
        session_id: &str,
        config_name: &str,
        config_hash: &str,
    ) -> StorageResult<()>;

    /// Gets a session by ID
    fn get_session(&self, session_id: &str) -> StorageResult<SessionRecord>;

    /// Marks a session as finished with the given status
    fn finish_session(&self, session_id: &str, status: SessionStatus) -> StorageResult<()>;
}

/// The pending-URL store behind the frontier
pub trait QueueStore: Send + Sync {
    /// Inserts entries and returns how many were written
    fn insert_queue_entries(&self, entries: &[QueueEntry]) -> StorageResult<usize>;

    /// Returns up to `limit` entries of a session, oldest `create_time` first
    fn oldest_queue_entries(&self, session_id: &str, limit: usize)
        -> StorageResult<Vec<QueueEntry>>;

    /// Deletes one entry; returns true only for the caller that removed it
    fn delete_queue_entry(&self, session_id: &str, id: i64) -> StorageResult<bool>;

    /// Checks if a URL is queued in a session
    fn queue_entry_exists(&self, session_id: &str, url: &str) -> StorageResult<bool>;

    /// Deletes every queued entry of a URL in a session
    fn delete_queue_entries_by_url(&self, session_id: &str, url: &str) -> StorageResult<usize>;

    /// Deletes every queued entry of a session
    fn delete_session_queue(&self, session_id: &str) -> StorageResult<usize>;

    /// Counts queued entries of a session
    fn count_queue_entries(&self, session_id: &str) -> StorageResult<u64>;
}

/// Records of fetched URLs
pub trait AccessStore: Send + Sync {
    /// Stores an access record and returns its ID
    fn insert_access_record(&self, record: &AccessRecord) -> StorageResult<i64>;

    /// Checks if a URL was already fetched in a session
    fn access_record_exists(&self, session_id: &str, url: &str) -> StorageResult<bool>;

    /// Returns the most recent record of a URL across all sessions
    fn latest_access_record(&self, url: &str) -> StorageResult<Option<AccessRecord>>;

    /// Gets all records of a session in insertion order
    fn session_access_records(&self, session_id: &str) -> StorageResult<Vec<AccessRecord>>;

    /// Deletes every record of a session
    fn delete_session_access_records(&self, session_id: &str) -> StorageResult<usize>;
}

/// The document index
pub trait DocumentStore: Send + Sync {
    /// Writes documents to an index and returns how many were written
    fn bulk_index(
        &self,
        index: &str,
        session_id: &str,
        documents: &[Map<String, Value>],
    ) -> StorageResult<usize>;

    /// Deletes every document of an index whose `url` field equals `url`
    fn delete_by_url(&self, index: &str, url: &str) -> StorageResult<usize>;

    /// Finds the documents of an index whose `url` field equals `url`
    fn find_by_url(&self, index: &str, url: &str) -> StorageResult<Vec<StoredDocument>>;

    /// Counts the documents of an index
    fn count_documents(&self, index: &str) -> StorageResult<u64>;

    /// Counts the documents a session wrote to an index
    fn count_session_documents(&self, index: &str, session_id: &str) -> StorageResult<u64>;
}

/// Scripts stored by ID for `indexed` script sources
pub trait ScriptStore: Send + Sync {
    /// Stores or replaces a script
    fn put_script(&self, id: &str, lang: &str, source: &str) -> StorageResult<()>;

    /// Loads a script as `(lang, source)`
    fn get_script(&self, id: &str) -> StorageResult<Option<(String, String)>>;
}

/// Pending crawl requests consumed by the polling worker
pub trait RequestStore: Send + Sync {
    /// Adds a request and returns its ID
    fn enqueue_request(&self, config_path: &str, session_id: Option<&str>) -> StorageResult<i64>;

    /// Returns up to `limit` requests, oldest first
    fn oldest_requests(&self, limit: usize) -> StorageResult<Vec<CrawlRequest>>;

    /// Deletes a request; returns true only for the caller that removed it
    fn delete_request(&self, id: i64) -> StorageResult<bool>;
}
