//! Rule-based extraction
//!
//! A fetched page is matched against the configured scraping rules; the
//! first matching rule's properties are read from the page, written into a
//! nested record by dot path, and expanded into one document per position
//! when properties live under the `[]` array marker.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sumi_trawl::config::load_config;
//! use sumi_trawl::extract::{Extractor, PageDescriptor};
//! use sumi_trawl::script::ScriptRunner;
//!
//! let config = load_config(std::path::Path::new("crawl.toml")).unwrap();
//! let extractor = Extractor::from_config(&config, Arc::new(ScriptRunner::new())).unwrap();
//! let page = PageDescriptor::new("session", "https://example.com/", "<title>Hi</title>");
//! if let Some(extraction) = extractor.process(&page).unwrap() {
//!     println!("{} documents", extraction.documents.len());
//! }
//! ```

mod descriptor;
mod expand;
mod orchestrator;
mod path;
mod rule;
mod selector;

pub use descriptor::{FieldValue, PageDescriptor, FIELDS};
pub use expand::{distinct, expand};
pub use orchestrator::{Extraction, Extractor};
pub use path::{flatten, is_array_path, set_path, strip_array_marker, ARRAY_MARKER};
pub use rule::{
    compile_rules, match_rule, AccessorQuery, ExtractionSpec, RuleSettings, ScrapingRule,
    ValueType,
};
pub use selector::{select_nodes, AccessContext, AccessError, Positional, Query, ACCESSORS};

use thiserror::Error;

/// Errors that fail the extraction of a whole page
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to parse content of {url}: {message}")]
    HtmlParse { url: String, message: String },
}

/// Result type for extraction
pub type ExtractResult<T> = Result<T, ExtractError>;
