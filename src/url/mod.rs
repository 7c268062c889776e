//! URL handling module for Sumi-Trawl
//!
//! This module resolves child URLs found on pages, normalizes them, and
//! applies the configured include/exclude filter.

mod filter;
mod normalize;

pub use filter::UrlFilter;
pub use normalize::normalize_url;

use url::Url;

/// Resolves a link found on a page to an absolute HTTP(S) URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute)
        }
        _ => None,
    }
}

/// Resolves and normalizes a child URL
///
/// Returns None if the link cannot be crawled.
pub fn prepare_child_url(href: &str, base_url: &Url) -> Option<String> {
    let absolute = resolve_link(href, base_url)?;
    normalize_url(absolute.as_str())
        .ok()
        .map(|url| url.to_string())
}
