//! Crawl frontier
//!
//! The frontier is the per-session set of URLs waiting to be fetched. It
//! sits on top of the queue and access-record stores and adds:
//!
//! - de-duplication against queued entries, fetched pages and recent claims
//! - at-most-once delivery: `poll` claims an entry by deleting it, and only
//!   the caller whose delete removed the row gets the entry
//! - a small ring of recently claimed URLs, so a URL that was just handed
//!   out is not treated as new while its access record does not exist yet
//! - incremental crawls: a claimed entry gets the last-modified time of the
//!   URL's most recent access record from any session
//!
//! Ordering is oldest `create_time` first among the entries a poller sees;
//! racing pollers can reorder a few entries.

use crate::storage::{AccessStore, QueueEntry, QueueStore, StorageResult};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Number of queued entries read per claim attempt
pub const POLL_BATCH_SIZE: usize = 20;

/// Number of recently claimed URLs remembered per process
pub const CLAIM_RING_CAPACITY: usize = 100;

/// Store requirements of the frontier
pub trait FrontierStore: QueueStore + AccessStore {}

impl<T: QueueStore + AccessStore> FrontierStore for T {}

/// Session-scoped URL frontier
pub struct Frontier {
    store: Arc<dyn FrontierStore>,
    incremental: bool,
    claimed: Mutex<VecDeque<(String, String)>>,
}

impl Frontier {
    pub fn new(store: Arc<dyn FrontierStore>) -> Self {
        Self {
            store,
            incremental: false,
            claimed: Mutex::new(VecDeque::with_capacity(CLAIM_RING_CAPACITY)),
        }
    }

    /// Enables last-modified backfill on claimed entries
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Queues a seed URL (depth 0)
    ///
    /// Returns false, after logging, if the URL is already known to the
    /// session.
    pub fn add(&self, session_id: &str, url: &str) -> StorageResult<bool> {
        let admitted = self.offer_all(session_id, vec![QueueEntry::new(session_id, url)])?;
        if admitted == 0 {
            tracing::info!("{} is already queued or visited in session {}", url, session_id);
        }
        Ok(admitted > 0)
    }

    /// Queues every entry that is new to the session
    ///
    /// An entry is dropped if its URL appears earlier in the same batch, is
    /// queued, was fetched, or was recently claimed. Returns the number of
    /// entries inserted.
    pub fn offer_all(&self, session_id: &str, entries: Vec<QueueEntry>) -> StorageResult<usize> {
        let mut batch_urls = HashSet::new();
        let mut admitted = Vec::with_capacity(entries.len());

        for mut entry in entries {
            if !batch_urls.insert(entry.url.clone()) {
                continue;
            }
            entry.session_id = session_id.to_string();
            if self.visited(&entry)? {
                tracing::trace!("Skipping known URL {}", entry.url);
                continue;
            }
            admitted.push(entry);
        }

        if admitted.is_empty() {
            return Ok(0);
        }
        self.store.insert_queue_entries(&admitted)
    }

    /// Claims the oldest available entry of a session
    ///
    /// Returns `Ok(None)` when nothing is queued.
    pub fn poll(&self, session_id: &str) -> StorageResult<Option<QueueEntry>> {
        loop {
            let batch = self.store.oldest_queue_entries(session_id, POLL_BATCH_SIZE)?;
            if batch.is_empty() {
                return Ok(None);
            }

            for mut entry in batch {
                let id = match entry.id {
                    Some(id) => id,
                    None => continue,
                };

                if self.recently_claimed(session_id, &entry.url) {
                    if self.store.delete_queue_entry(session_id, id)? {
                        tracing::trace!("Dropped queued duplicate of claimed {}", entry.url);
                    }
                    continue;
                }

                if !self.store.delete_queue_entry(session_id, id)? {
                    tracing::trace!("Entry {} for {} claimed by another poller", id, entry.url);
                    continue;
                }

                self.remember_claim(session_id, &entry.url);
                if self.incremental {
                    self.backfill_last_modified(&mut entry);
                }
                return Ok(Some(entry));
            }
            // Every entry of the batch is gone now; read the next one.
        }
    }

    /// Returns true if the entry's URL is queued, fetched or recently
    /// claimed in its session
    pub fn visited(&self, entry: &QueueEntry) -> StorageResult<bool> {
        Ok(self.recently_claimed(&entry.session_id, &entry.url)
            || self.store.queue_entry_exists(&entry.session_id, &entry.url)?
            || self.store.access_record_exists(&entry.session_id, &entry.url)?)
    }

    /// Removes every queued entry of a URL, after the URL was processed
    pub fn remove_url(&self, session_id: &str, url: &str) -> StorageResult<usize> {
        self.store.delete_queue_entries_by_url(session_id, url)
    }

    /// Removes every queued entry of a session
    ///
    /// Safe to call while other workers poll: they just find fewer entries.
    pub fn delete(&self, session_id: &str) -> StorageResult<usize> {
        if let Ok(mut ring) = self.claimed.lock() {
            ring.retain(|(session, _)| session != session_id);
        }
        self.store.delete_session_queue(session_id)
    }

    /// Number of queued entries of a session
    pub fn pending(&self, session_id: &str) -> StorageResult<u64> {
        self.store.count_queue_entries(session_id)
    }

    fn recently_claimed(&self, session_id: &str, url: &str) -> bool {
        self.claimed
            .lock()
            .map(|ring| ring.iter().any(|(s, u)| s == session_id && u == url))
            .unwrap_or(false)
    }

    fn remember_claim(&self, session_id: &str, url: &str) {
        if let Ok(mut ring) = self.claimed.lock() {
            if ring.len() >= CLAIM_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back((session_id.to_string(), url.to_string()));
        }
    }

    fn backfill_last_modified(&self, entry: &mut QueueEntry) {
        match self.store.latest_access_record(&entry.url) {
            Ok(Some(record)) => {
                if let Some(last_modified) = record.last_modified {
                    entry.last_modified = last_modified;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to look up last access of {}: {}", entry.url, e),
        }
    }
}
