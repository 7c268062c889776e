//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! per-session statistics from the storage layer.

use crate::state::AccessStatus;
use crate::storage::{
    AccessStore, DocumentStore, QueueStore, SessionRecord, SessionStore, StorageResult,
};
use std::collections::{BTreeMap, HashMap};

/// Session statistics summary
#[derive(Debug, Clone)]
pub struct SessionStatistics {
    pub session: SessionRecord,

    /// Total number of access records
    pub total_accessed: u64,

    /// Count of access records by status
    pub accessed_by_status: HashMap<AccessStatus, u64>,

    /// Count of access records by HTTP status code
    pub http_status_codes: BTreeMap<u16, u64>,

    /// Count of processed pages by matched rule
    pub pages_by_rule: BTreeMap<String, u64>,

    /// Documents written by this session
    pub documents: u64,

    /// Queue entries still waiting
    pub pending: u64,
}

/// Loads statistics of one session
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `session_id` - The session to summarize
/// * `index` - The index the session wrote documents to
pub fn load_statistics<S>(storage: &S, session_id: &str, index: &str) -> StorageResult<SessionStatistics>
where
    S: SessionStore + AccessStore + QueueStore + DocumentStore,
{
    let session = storage.get_session(session_id)?;
    let records = storage.session_access_records(session_id)?;

    let mut accessed_by_status = HashMap::new();
    let mut http_status_codes = BTreeMap::new();
    let mut pages_by_rule = BTreeMap::new();
    for record in &records {
        *accessed_by_status.entry(record.status).or_insert(0) += 1;
        *http_status_codes.entry(record.http_status_code).or_insert(0) += 1;
        if let Some(rule) = &record.rule {
            *pages_by_rule.entry(rule.clone()).or_insert(0) += 1;
        }
    }

    Ok(SessionStatistics {
        session,
        total_accessed: records.len() as u64,
        accessed_by_status,
        http_status_codes,
        pages_by_rule,
        documents: storage.count_session_documents(index, session_id)?,
        pending: storage.count_queue_entries(session_id)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &SessionStatistics) {
    println!("=== Session Statistics ===\n");

    println!("Session:");
    println!("  ID: {}", stats.session.session_id);
    println!("  Configuration: {}", stats.session.config_name);
    println!("  Status: {}", stats.session.status.to_db_string());
    println!("  Started: {}", stats.session.started_at);
    if let Some(finished) = &stats.session.finished_at {
        println!("  Finished: {}", finished);
    }
    println!();

    println!("Overview:");
    println!("  Pages accessed: {}", stats.total_accessed);
    println!("  Documents written: {}", stats.documents);
    println!("  URLs still queued: {}", stats.pending);
    println!();

    println!("Pages by Status:");
    for status in AccessStatus::all() {
        let count = stats.accessed_by_status.get(&status).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let percentage = (count as f64 / stats.total_accessed as f64) * 100.0;
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.http_status_codes.is_empty() {
        println!("HTTP Status Codes:");
        for (code, count) in &stats.http_status_codes {
            println!("  {}: {}", code, count);
        }
        println!();
    }

    if !stats.pages_by_rule.is_empty() {
        println!("Pages by Rule:");
        for (rule, count) in &stats.pages_by_rule {
            println!("  {}: {}", rule, count);
        }
    }
}
