//! Crawler coordinator - session orchestration
//!
//! A session seeds the frontier with the configured URLs and runs
//! `num_of_thread` workers. Each worker loops:
//!
//! 1. claim an entry from the frontier
//! 2. fetch it (conditionally, in incremental mode)
//! 3. extract documents on a blocking thread
//! 4. write documents and the access record
//! 5. offer the child URLs found on the page
//!
//! The session ends when the queue is empty and every worker is idle, when
//! `max_access_count` entries were claimed, or when a stop is requested.

use crate::config::Config;
use crate::crawler::fetcher::{build_http_client, fetch_entry, FetchOutcome, FetchedPage};
use crate::extract::{Extraction, Extractor, PageDescriptor};
use crate::frontier::Frontier;
use crate::script::{ScriptKind, ScriptRunner, ScriptSpec};
use crate::state::AccessStatus;
use crate::storage::{
    AccessRecord, AccessStore, DocumentStore, QueueEntry, SessionStatus, SessionStore,
    SqliteStorage,
};
use crate::url::{normalize_url, prepare_child_url, UrlFilter};
use crate::TrawlError;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Pause of an idle worker before it polls again
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counters of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    /// Entries claimed from the frontier
    pub claimed: u64,
    /// Access records written
    pub accessed: u64,
    /// Documents written
    pub documents: u64,
    /// Queued entries left when the session ended (before cleanup)
    pub pending: u64,
}

/// State shared by the workers of one session
struct SessionContext {
    config: Arc<Config>,
    storage: Arc<SqliteStorage>,
    frontier: Frontier,
    extractor: Arc<Extractor>,
    filter: UrlFilter,
    client: Client,
    session_id: String,
    stop: Arc<AtomicBool>,
    active: AtomicUsize,
    claimed: AtomicU64,
    accessed: AtomicU64,
    documents: AtomicU64,
}

impl SessionContext {
    /// Reserves one claim against `max_access_count`
    fn reserve_claim(&self) -> bool {
        match self.config.max_access_count {
            Some(max) => self
                .claimed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
            None => {
                self.claimed.fetch_add(1, Ordering::SeqCst);
                true
            }
        }
    }

    fn release_claim(&self) {
        self.claimed.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: Arc<SqliteStorage>,
    scripts: Arc<ScriptRunner>,
    extractor: Arc<Extractor>,
    filter: UrlFilter,
    client: Client,
    session_id: String,
    config_hash: String,
    stop: Arc<AtomicBool>,
}

impl Coordinator {
    /// Creates a coordinator for one session
    ///
    /// Compiles the scraping rules and the URL filter and builds the HTTP
    /// client. The session id is generated when none is given.
    pub fn new(
        config: Config,
        storage: Arc<SqliteStorage>,
        session_id: Option<String>,
        config_hash: String,
    ) -> Result<Self, TrawlError> {
        let scripts = Arc::new(ScriptRunner::new().with_store(storage.clone()));
        let extractor = Arc::new(Extractor::from_config(&config, scripts.clone())?);
        let filter = UrlFilter::from_config(&config)?;
        let client = build_http_client(config.user_agent.as_deref())?;
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            config: Arc::new(config),
            storage,
            scripts,
            extractor,
            filter,
            client,
            session_id,
            config_hash,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Flag that stops the workers once set
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs the session to completion
    pub async fn run(self) -> Result<SessionSummary, TrawlError> {
        let started = Instant::now();
        let session_id = self.session_id.clone();

        self.storage
            .create_session(&session_id, self.config.display_name(), &self.config_hash)?;
        tracing::info!(
            "Starting session {} for {} ({} workers)",
            session_id,
            self.config.display_name(),
            self.config.num_of_thread
        );

        self.run_hook("execute", self.session_variables());

        let frontier =
            Frontier::new(self.storage.clone()).with_incremental(self.config.incremental);
        let mut seeded = 0;
        for seed in &self.config.urls {
            match normalize_url(seed) {
                Ok(url) => {
                    if frontier.add(&session_id, url.as_str())? {
                        seeded += 1;
                    }
                }
                Err(e) => tracing::warn!("Skipping seed {}: {}", seed, e),
            }
        }
        tracing::debug!("Seeded {} URLs", seeded);

        let ctx = Arc::new(SessionContext {
            config: self.config.clone(),
            storage: self.storage.clone(),
            frontier,
            extractor: self.extractor.clone(),
            filter: self.filter.clone(),
            client: self.client.clone(),
            session_id: session_id.clone(),
            stop: self.stop.clone(),
            active: AtomicUsize::new(0),
            claimed: AtomicU64::new(0),
            accessed: AtomicU64::new(0),
            documents: AtomicU64::new(0),
        });

        let workers: Vec<_> = (0..self.config.num_of_thread.max(1))
            .map(|worker_id| tokio::spawn(run_worker(ctx.clone(), worker_id)))
            .collect();

        let mut failed = false;
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Worker task failed: {}", e);
                failed = true;
            }
        }

        let pending = ctx.frontier.pending(&session_id)?;
        let status = if failed {
            SessionStatus::Failed
        } else if self.stop.load(Ordering::SeqCst) {
            SessionStatus::Interrupted
        } else {
            SessionStatus::Completed
        };

        let summary = SessionSummary {
            session_id: session_id.clone(),
            status,
            claimed: ctx.claimed.load(Ordering::SeqCst),
            accessed: ctx.accessed.load(Ordering::SeqCst),
            documents: ctx.documents.load(Ordering::SeqCst),
            pending,
        };

        let mut finish_vars = self.session_variables();
        finish_vars.insert("status".to_string(), status.to_db_string().into());
        finish_vars.insert("accessed".to_string(), summary.accessed.into());
        finish_vars.insert("documents".to_string(), summary.documents.into());
        finish_vars.insert("pending".to_string(), summary.pending.into());
        self.run_hook("finish", finish_vars);

        if self.config.cleanup {
            let removed = ctx.frontier.delete(&session_id)?;
            if removed > 0 {
                tracing::debug!("Removed {} queued entries of session {}", removed, session_id);
            }
        }

        self.storage.finish_session(&session_id, status)?;
        tracing::info!(
            "Session {} {}: {} pages, {} documents in {:?}",
            session_id,
            status.to_db_string(),
            summary.accessed,
            summary.documents,
            started.elapsed()
        );

        Ok(summary)
    }

    fn session_variables(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("session_id".to_string(), self.session_id.clone().into());
        vars.insert(
            "config_name".to_string(),
            self.config.display_name().to_string().into(),
        );
        vars.insert(
            "urls".to_string(),
            Value::Array(self.config.urls.iter().cloned().map(Value::String).collect()),
        );
        vars
    }

    /// Runs a session hook; failures are logged only
    fn run_hook(&self, hook: &str, variables: Map<String, Value>) {
        let hooks = match &self.config.script {
            Some(hooks) => hooks,
            None => return,
        };
        let source = match hook {
            "execute" => hooks.execute.as_ref(),
            _ => hooks.finish.as_ref(),
        };
        let source = match source {
            Some(source) => source,
            None => return,
        };
        let kind = match ScriptKind::parse(&hooks.script_type) {
            Some(kind) => kind,
            None => {
                tracing::error!("Unknown script_type '{}' for {} hook", hooks.script_type, hook);
                return;
            }
        };

        let spec = ScriptSpec {
            lang: hooks.lang.clone(),
            kind,
            source: source.clone(),
        };
        match self.scripts.run(&spec, hook, variables) {
            Ok(_) => tracing::debug!("Ran {} hook", hook),
            Err(e) => tracing::error!("The {} hook failed: {}", hook, e),
        }
    }
}

/// Worker loop: claim, process, repeat until the session ends
async fn run_worker(ctx: Arc<SessionContext>, worker_id: u32) {
    let interval = Duration::from_millis(ctx.config.interval);
    tracing::trace!("Worker {} started", worker_id);

    loop {
        if ctx.stop.load(Ordering::SeqCst) {
            break;
        }

        ctx.active.fetch_add(1, Ordering::SeqCst);
        if !ctx.reserve_claim() {
            // Reservations of idle workers are given back after their poll
            let others = ctx.active.fetch_sub(1, Ordering::SeqCst) - 1;
            if others == 0 {
                break;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            continue;
        }

        let entry = match ctx.frontier.poll(&ctx.session_id) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Failed to poll the frontier: {}", e);
                None
            }
        };

        match entry {
            Some(entry) => {
                if let Err(e) = process_entry(&ctx, &entry).await {
                    tracing::error!("Error processing {}: {}", entry.url, e);
                }
                ctx.active.fetch_sub(1, Ordering::SeqCst);
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
            }
            None => {
                ctx.release_claim();
                let still_active = ctx.active.fetch_sub(1, Ordering::SeqCst) - 1;
                if still_active == 0 {
                    break;
                }
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        }
    }

    tracing::trace!("Worker {} stopped", worker_id);
}

/// Fetches, extracts and records one claimed entry
async fn process_entry(ctx: &SessionContext, entry: &QueueEntry) -> Result<(), TrawlError> {
    tracing::debug!("Processing {} (depth {})", entry.url, entry.depth);

    let outcome = match fetch_entry(&ctx.client, entry).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!("Dropping {}: {}", entry.url, e);
            return Ok(());
        }
    };

    let recorded = match outcome {
        FetchOutcome::NotModified {
            status_code,
            execution_time,
        } => {
            tracing::debug!("{} is not modified", entry.url);
            let mut record = access_record(entry, AccessStatus::NotModified, status_code);
            record.execution_time = execution_time;
            record.last_modified = entry.has_last_modified().then_some(entry.last_modified);
            record_access(ctx, &record)
        }
        FetchOutcome::Fetched(fetched) => process_page(ctx, entry, fetched).await,
    };

    // Queued duplicates go even when the record could not be written
    ctx.frontier.remove_url(&ctx.session_id, &entry.url)?;
    recorded
}

fn record_access(ctx: &SessionContext, record: &AccessRecord) -> Result<(), TrawlError> {
    ctx.storage.insert_access_record(record)?;
    ctx.accessed.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

async fn process_page(
    ctx: &SessionContext,
    entry: &QueueEntry,
    fetched: FetchedPage,
) -> Result<(), TrawlError> {
    let page = page_descriptor(entry, &fetched);
    let mut record = access_record(entry, AccessStatus::Skipped, fetched.status_code);
    record.mime_type = fetched.mime_type.clone();
    record.content_length = fetched.content_length;
    record.execution_time = fetched.execution_time;
    record.last_modified = fetched.last_modified;

    let extractor = ctx.extractor.clone();
    let result = tokio::task::spawn_blocking(move || extractor.process(&page))
        .await
        .map_err(|e| TrawlError::Worker(e.to_string()))?;

    match result {
        Ok(Some(extraction)) => {
            record.status = AccessStatus::Processed;
            record.rule = Some(extraction.rule.clone());
            record.document_count = write_documents(ctx, entry, &extraction) as u32;
            if let Err(e) = offer_children(ctx, entry, &fetched.final_url, &extraction.child_urls) {
                tracing::error!("Failed to queue the links of {}: {}", entry.url, e);
            }
        }
        Ok(None) => {
            tracing::debug!("No rule matched {}", entry.url);
        }
        Err(e) => {
            tracing::warn!("{}", e);
            record.status = AccessStatus::ExtractionFailed;
        }
    }

    record_access(ctx, &record)
}

/// Writes the documents of a page and returns how many were stored
///
/// Store failures are logged. A failed overwrite-delete still lets the
/// new documents through; a failed write stores none.
fn write_documents(ctx: &SessionContext, entry: &QueueEntry, extraction: &Extraction) -> usize {
    let index = &ctx.config.index;
    if extraction.overwrite {
        match ctx.storage.delete_by_url(index, &entry.url) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("Replaced {} documents of {}", removed, entry.url),
            Err(e) => tracing::error!("Failed to delete old documents of {}: {}", entry.url, e),
        }
    }

    let documents = extraction.stamped_documents(Utc::now(), ctx.config.doc_type.as_deref());
    match ctx.storage.bulk_index(index, &ctx.session_id, &documents) {
        Ok(written) => {
            ctx.documents.fetch_add(written as u64, Ordering::SeqCst);
            written
        }
        Err(e) => {
            tracing::error!("Failed to write documents of {}: {}", entry.url, e);
            0
        }
    }
}

/// Resolves, filters and queues the child URLs of a page
fn offer_children(
    ctx: &SessionContext,
    entry: &QueueEntry,
    base_url: &str,
    child_urls: &[String],
) -> Result<usize, TrawlError> {
    if child_urls.is_empty() {
        return Ok(0);
    }

    let depth = entry.depth + 1;
    if let Some(max_depth) = ctx.config.max_depth {
        if depth > max_depth {
            tracing::debug!("Not following links of {}: depth limit", entry.url);
            return Ok(0);
        }
    }

    let base = Url::parse(base_url)?;
    let children: Vec<QueueEntry> = child_urls
        .iter()
        .filter_map(|href| prepare_child_url(href, &base))
        .filter(|url| ctx.filter.is_allowed(url))
        .map(|url| QueueEntry::child(&ctx.session_id, &url, &entry.url, depth))
        .collect();

    let queued = ctx.frontier.offer_all(&ctx.session_id, children)?;
    tracing::debug!("Queued {} of {} child URLs from {}", queued, child_urls.len(), entry.url);
    Ok(queued)
}

fn page_descriptor(entry: &QueueEntry, fetched: &FetchedPage) -> PageDescriptor {
    let mut page = PageDescriptor::new(&entry.session_id, &entry.url, fetched.body.clone());
    page.parent_url = entry.parent_url.clone();
    page.method = entry.method.clone();
    page.mime_type = fetched.mime_type.clone();
    page.charset = fetched.charset.clone();
    page.http_status_code = fetched.status_code;
    page.content_length = fetched.content_length;
    page.execution_time = fetched.execution_time;
    page.last_modified = fetched.last_modified;
    page
}

fn access_record(entry: &QueueEntry, status: AccessStatus, http_status_code: u16) -> AccessRecord {
    AccessRecord {
        id: None,
        session_id: entry.session_id.clone(),
        url: entry.url.clone(),
        parent_url: entry.parent_url.clone(),
        method: entry.method.clone(),
        status,
        http_status_code,
        mime_type: None,
        content_length: 0,
        execution_time: 0,
        last_modified: None,
        create_time: Utc::now(),
        rule: None,
        document_count: 0,
    }
}

/// Crawls one configuration in a fresh or given session
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use sumi_trawl::config::load_config_with_hash;
/// use sumi_trawl::crawler::run_crawl;
/// use sumi_trawl::storage::open_storage;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("crawl.toml"))?;
/// let storage = Arc::new(open_storage(Path::new(&config.database_path))?);
/// let summary = run_crawl(config, storage, None, hash).await?;
/// println!("{} documents", summary.documents);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    storage: Arc<SqliteStorage>,
    session_id: Option<String>,
    config_hash: String,
) -> Result<SessionSummary, TrawlError> {
    Coordinator::new(config, storage, session_id, config_hash)?
        .run()
        .await
}
