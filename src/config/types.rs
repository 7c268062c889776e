use serde::Deserialize;
use serde_json::{Map, Value};

/// Main configuration structure for a crawl session
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Human readable name of this configuration
    #[serde(default)]
    pub name: Option<String>,

    /// Seed URLs
    pub urls: Vec<String>,

    /// URL patterns a discovered URL must match (any of them)
    #[serde(default)]
    pub include_urls: Vec<String>,

    /// URL patterns that reject a discovered URL
    #[serde(default)]
    pub exclude_urls: Vec<String>,

    /// Maximum link depth from the seeds; unlimited when absent
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Maximum number of URLs claimed from the frontier in one session
    #[serde(default)]
    pub max_access_count: Option<u64>,

    /// Number of concurrent workers
    #[serde(default = "default_num_of_thread")]
    pub num_of_thread: u32,

    /// Pause after each fetch of a worker (milliseconds)
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Replace documents of a re-crawled URL instead of accumulating them
    #[serde(default)]
    pub overwrite: bool,

    /// Send conditional requests based on the previous session's results
    #[serde(default)]
    pub incremental: bool,

    /// Name of the index documents are written to
    #[serde(default = "default_index")]
    pub index: String,

    /// Optional document type tag
    #[serde(default, rename = "type")]
    pub doc_type: Option<String>,

    /// User agent sent with every request
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Delete the session's queued entries once the crawl ends
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,

    /// Session lifecycle hooks
    #[serde(default)]
    pub script: Option<ScriptHooks>,

    /// Scraping targets, one per rule
    #[serde(default)]
    pub target: Vec<TargetConfig>,
}

/// Scripts run at the start and at the end of a session
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptHooks {
    #[serde(default = "default_lang")]
    pub lang: String,

    /// One of `inline`, `file` or `indexed`
    #[serde(default = "default_script_type")]
    pub script_type: String,

    #[serde(default)]
    pub execute: Option<String>,

    #[serde(default)]
    pub finish: Option<String>,
}

/// One scraping target as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Page descriptor field name -> regex
    #[serde(default)]
    pub pattern: Map<String, Value>,

    /// Property path -> property specification
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,

    /// Free-form rule settings
    #[serde(default)]
    pub settings: Map<String, Value>,
}

fn default_num_of_thread() -> u32 {
    5
}

fn default_interval() -> u64 {
    1000
}

fn default_index() -> String {
    "web".to_string()
}

fn default_database_path() -> String {
    "./sumi-trawl.db".to_string()
}

fn default_cleanup() -> bool {
    true
}

pub(crate) fn default_lang() -> String {
    "lua".to_string()
}

fn default_script_type() -> String {
    "inline".to_string()
}

impl Config {
    /// Returns the configuration name, falling back to the first seed URL
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or_else(|| self.urls.first().map(String::as_str))
            .unwrap_or("unnamed")
    }
}
