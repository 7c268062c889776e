//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client with the configured user agent
//! - Conditional GET requests for incremental crawls
//! - Splitting the Content-Type header into MIME type and charset
//! - Error classification

use crate::storage::QueueEntry;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum number of redirects followed per request
const MAX_REDIRECTS: usize = 10;

/// HTTP date format used by `If-Modified-Since`
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A fetch that produced no page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
}

/// A page body with the response metadata extraction needs
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: String,
    pub status_code: u16,
    pub mime_type: Option<String>,
    pub charset: Option<String>,
    pub content_length: u64,
    /// Request duration in milliseconds
    pub execution_time: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub body: Vec<u8>,
}

/// Result of a successful request
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(FetchedPage),

    /// The page did not change since the entry's last-modified time
    NotModified { status_code: u16, execution_time: u64 },
}

/// Default user agent: `sumi-trawl/<version>`
pub fn default_user_agent() -> String {
    format!("sumi-trawl/{}", env!("CARGO_PKG_VERSION"))
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use sumi_trawl::crawler::build_http_client;
///
/// let client = build_http_client(Some("MyHarvester/1.0")).unwrap();
/// ```
pub fn build_http_client(user_agent: Option<&str>) -> Result<Client, reqwest::Error> {
    let user_agent = user_agent
        .map(str::to_string)
        .unwrap_or_else(default_user_agent);

    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a claimed queue entry
///
/// # Request Flow
///
/// 1. Send GET, with `If-Modified-Since` when the entry carries a known
///    last-modified time
/// 2. `304`, or a `Last-Modified` not newer than the known time → NotModified
/// 3. Any other non-2xx status → `FetchError::Status`
/// 4. Read the body
pub async fn fetch_entry(client: &Client, entry: &QueueEntry) -> Result<FetchOutcome, FetchError> {
    let started = Instant::now();
    let known = entry.has_last_modified().then_some(entry.last_modified);

    let mut request = client.get(&entry.url);
    if let Some(known) = known {
        request = request.header(IF_MODIFIED_SINCE, format_http_date(&known));
    }

    let response = request.send().await.map_err(|source| FetchError::Network {
        url: entry.url.clone(),
        source,
    })?;

    let status = response.status();
    if status == StatusCode::NOT_MODIFIED {
        return Ok(FetchOutcome::NotModified {
            status_code: status.as_u16(),
            execution_time: elapsed_millis(started),
        });
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            url: entry.url.clone(),
            status: status.as_u16(),
        });
    }

    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    if let (Some(known), Some(current)) = (known, last_modified) {
        if current <= known {
            return Ok(FetchOutcome::NotModified {
                status_code: status.as_u16(),
                execution_time: elapsed_millis(started),
            });
        }
    }

    let final_url = response.url().to_string();
    let (mime_type, charset) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(split_content_type)
        .unwrap_or((None, None));

    let body = response
        .bytes()
        .await
        .map_err(|source| FetchError::Network {
            url: entry.url.clone(),
            source,
        })?
        .to_vec();

    Ok(FetchOutcome::Fetched(FetchedPage {
        final_url,
        status_code: status.as_u16(),
        mime_type,
        charset,
        content_length: body.len() as u64,
        execution_time: elapsed_millis(started),
        last_modified,
        body,
    }))
}

/// Splits `text/html; charset=UTF-8` into `("text/html", "utf-8")`
pub fn split_content_type(header: &str) -> (Option<String>, Option<String>) {
    let mut parts = header.split(';');
    let mime_type = parts
        .next()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty());

    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_lowercase())
        } else {
            None
        }
    });

    (mime_type, charset.filter(|c| !c.is_empty()))
}

/// Parses an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`)
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_http_date(time: &DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

fn elapsed_millis(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(None).is_ok());
        assert!(build_http_client(Some("TestHarvester/1.0")).is_ok());
    }

    #[test]
    fn test_default_user_agent() {
        assert!(default_user_agent().starts_with("sumi-trawl/"));
    }

    #[test]
    fn test_split_content_type() {
        assert_eq!(
            split_content_type("text/html; charset=UTF-8"),
            (Some("text/html".to_string()), Some("utf-8".to_string()))
        );
        assert_eq!(
            split_content_type("Application/JSON"),
            (Some("application/json".to_string()), None)
        );
        assert_eq!(
            split_content_type("text/html;charset=\"Shift_JIS\""),
            (Some("text/html".to_string()), Some("shift_jis".to_string()))
        );
    }

    #[test]
    fn test_http_date_roundtrip() {
        let time = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        let formatted = format_http_date(&time);
        assert_eq!(formatted, "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_http_date(&formatted), Some(time));
    }

    #[test]
    fn test_parse_invalid_http_date() {
        assert_eq!(parse_http_date("yesterday"), None);
    }
}
