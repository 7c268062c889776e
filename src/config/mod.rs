//! Configuration module for Sumi-Trawl
//!
//! This module handles loading, parsing, and validating crawl configuration
//! files. A configuration is either TOML or JSON (chosen by file extension)
//! and carries the seed URLs, crawl limits and the scraping targets that are
//! compiled into [`crate::extract::ScrapingRule`]s.
//!
//! # Example
//!
//! ```no_run
//! use sumi_trawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Crawler will run {} workers", config.num_of_thread);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, ScriptHooks, TargetConfig};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config_str, ConfigFormat,
};
pub use validation::validate;
