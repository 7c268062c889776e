//! Crawl-request work queue
//!
//! Crawl requests are configuration paths stored in the `crawl_requests`
//! table (see `sumi-trawl --enqueue`). A serving process claims the oldest
//! request by deleting it, exactly like a frontier poll, crawls it and
//! goes back to waiting. It stops once no request arrived for the idle
//! timeout, or when stopped.

use crate::config::load_config_with_hash;
use crate::crawler::coordinator::Coordinator;
use crate::storage::{CrawlRequest, RequestStore, SqliteStorage};
use crate::TrawlError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause between two looks at an empty request table
const REQUEST_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Claims the oldest crawl request, if any
pub fn claim_request(storage: &SqliteStorage) -> Result<Option<CrawlRequest>, TrawlError> {
    for request in storage.oldest_requests(10)? {
        if storage.delete_request(request.id)? {
            return Ok(Some(request));
        }
        tracing::trace!("Crawl request {} claimed by another process", request.id);
    }
    Ok(None)
}

/// Serves crawl requests until idle for `idle_timeout`
///
/// Returns the number of requests that were crawled. A request whose
/// configuration cannot be loaded is logged and skipped.
pub async fn serve_requests(
    storage: Arc<SqliteStorage>,
    idle_timeout: Duration,
    stop: Arc<AtomicBool>,
) -> Result<usize, TrawlError> {
    tracing::info!(
        "Waiting for crawl requests (idle timeout {}s)",
        idle_timeout.as_secs()
    );

    let mut served = 0;
    let mut last_activity = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let request = match claim_request(&storage)? {
            Some(request) => request,
            None => {
                let idle = last_activity.elapsed();
                if idle >= idle_timeout {
                    tracing::info!("No crawl request for {:?}, exiting", idle);
                    break;
                }
                tokio::time::sleep(REQUEST_POLL_INTERVAL.min(idle_timeout - idle)).await;
                continue;
            }
        };

        tracing::info!("Crawl request {}: {}", request.id, request.config_path);
        let (config, hash) = match load_config_with_hash(Path::new(&request.config_path)) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!("Skipping crawl request {}: {}", request.id, e);
                last_activity = Instant::now();
                continue;
            }
        };

        let coordinator = Coordinator::new(config, storage.clone(), request.session_id, hash)?;
        let session_stop = coordinator.stop_handle();
        let watcher = tokio::spawn(forward_stop(stop.clone(), session_stop));
        let result = coordinator.run().await;
        watcher.abort();

        match result {
            Ok(summary) => {
                tracing::info!(
                    "Crawl request {} finished: session {} wrote {} documents",
                    request.id,
                    summary.session_id,
                    summary.documents
                );
                served += 1;
            }
            Err(e) => tracing::error!("Crawl request {} failed: {}", request.id, e),
        }
        last_activity = Instant::now();
    }

    Ok(served)
}

/// Copies a process-wide stop into a session's stop flag
async fn forward_stop(global: Arc<AtomicBool>, session: Arc<AtomicBool>) {
    loop {
        if global.load(Ordering::SeqCst) {
            session.store(true, Ordering::SeqCst);
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_request_oldest_first() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage.enqueue_request("a.toml", None).unwrap();
        storage.enqueue_request("b.toml", Some("s2")).unwrap();

        let first = claim_request(&storage).unwrap().unwrap();
        assert_eq!(first.config_path, "a.toml");
        let second = claim_request(&storage).unwrap().unwrap();
        assert_eq!(second.config_path, "b.toml");
        assert_eq!(second.session_id.as_deref(), Some("s2"));
        assert!(claim_request(&storage).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_serve_exits_when_idle() {
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let served = serve_requests(storage, Duration::from_millis(50), stop)
            .await
            .unwrap();
        assert_eq!(served, 0);
    }

    #[tokio::test]
    async fn test_serve_skips_missing_config() {
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        storage
            .enqueue_request("/nonexistent/crawl.toml", None)
            .unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let served = serve_requests(storage.clone(), Duration::from_millis(50), stop)
            .await
            .unwrap();
        assert_eq!(served, 0);
        assert!(storage.oldest_requests(10).unwrap().is_empty());
    }
}
