//! Crawler module for web page fetching and processing
//!
//! This module contains the crawl engine:
//! - HTTP fetching, conditional in incremental mode
//! - Session coordination over a pool of workers
//! - The crawl-request work queue served by the binary

mod coordinator;
mod fetcher;
mod requests;

pub use coordinator::{run_crawl, Coordinator, SessionSummary};
pub use fetcher::{
    build_http_client, default_user_agent, fetch_entry, format_http_date, parse_http_date,
    split_content_type, FetchError, FetchOutcome, FetchedPage,
};
pub use requests::{claim_request, serve_requests};
