use crate::config::Config;
use crate::ConfigError;
use regex::Regex;

/// Include/exclude URL filter
///
/// Patterns are full-match regular expressions. With no include patterns
/// every URL is included; an exclude match always wins.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

fn compile(field: &str, patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                ConfigError::InvalidPattern(format!("{} entry '{}': {}", field, pattern, e))
            })
        })
        .collect()
}

impl UrlFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            include: compile("include_urls", include)?,
            exclude: compile("exclude_urls", exclude)?,
        })
    }

    /// Builds the filter from `include_urls` and `exclude_urls`
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(&config.include_urls, &config.exclude_urls)
    }

    /// Returns true if the URL may be crawled
    pub fn is_allowed(&self, url: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|re| re.is_match(url));
        included && !self.exclude.iter().any(|re| re.is_match(url))
    }
}
