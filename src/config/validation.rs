use crate::config::types::{Config, ScriptHooks};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
///
/// Targets are only checked for presence here; each target is compiled into
/// a scraping rule when a session starts, and a broken target is dropped on
/// its own there.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_seed_urls(&config.urls)?;
    validate_url_patterns("include_urls", &config.include_urls)?;
    validate_url_patterns("exclude_urls", &config.exclude_urls)?;
    validate_limits(config)?;
    validate_storage(config)?;
    if let Some(hooks) = &config.script {
        validate_script_hooks(hooks)?;
    }

    if config.target.is_empty() {
        return Err(ConfigError::EmptyTargets);
    }

    Ok(())
}

/// Validates the seed URL list
fn validate_seed_urls(urls: &[String]) -> Result<(), ConfigError> {
    if urls.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed URL is required in 'urls'".to_string(),
        ));
    }

    for seed in urls {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }
    }

    Ok(())
}

/// Validates that every include/exclude pattern is a valid regex
fn validate_url_patterns(field: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("{} entry '{}': {}", field, pattern, e))
        })?;
    }
    Ok(())
}

/// Validates worker and limit settings
fn validate_limits(config: &Config) -> Result<(), ConfigError> {
    if config.num_of_thread < 1 || config.num_of_thread > 100 {
        return Err(ConfigError::Validation(format!(
            "num_of_thread must be between 1 and 100, got {}",
            config.num_of_thread
        )));
    }

    if config.max_access_count == Some(0) {
        return Err(ConfigError::Validation(
            "max_access_count must be >= 1 when set".to_string(),
        ));
    }

    if config.index.trim().is_empty() {
        return Err(ConfigError::Validation("index cannot be empty".to_string()));
    }

    Ok(())
}

/// Validates storage settings
fn validate_storage(config: &Config) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates session hook settings
fn validate_script_hooks(hooks: &ScriptHooks) -> Result<(), ConfigError> {
    if hooks.lang.trim().is_empty() {
        return Err(ConfigError::Validation(
            "script.lang cannot be empty".to_string(),
        ));
    }

    if !matches!(hooks.script_type.as_str(), "inline" | "file" | "indexed") {
        return Err(ConfigError::Validation(format!(
            "script.script_type must be one of inline, file, indexed; got '{}'",
            hooks.script_type
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_config() -> Config {
        serde_json::from_value(json!({
            "urls": ["https://example.com/"],
            "target": [{"pattern": {"url": ".*"}, "properties": {"t": {"text": "title"}}}]
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_missing_seeds() {
        let mut config = base_config();
        config.urls.clear();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_seed_scheme() {
        let mut config = base_config();
        config.urls = vec!["ftp://example.com/".to_string()];
        assert!(validate(&config).is_err());

        config.urls = vec!["not a url".to_string()];
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_invalid_include_pattern() {
        let mut config = base_config();
        config.include_urls = vec!["https://(unclosed".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_thread_bounds() {
        let mut config = base_config();
        config.num_of_thread = 0;
        assert!(validate(&config).is_err());
        config.num_of_thread = 101;
        assert!(validate(&config).is_err());
        config.num_of_thread = 100;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_targets() {
        let mut config = base_config();
        config.target.clear();
        assert!(matches!(validate(&config), Err(ConfigError::EmptyTargets)));
    }

    #[test]
    fn test_script_hook_type() {
        let mut config = base_config();
        config.script = Some(ScriptHooks {
            lang: "lua".to_string(),
            script_type: "remote".to_string(),
            execute: None,
            finish: None,
        });
        assert!(validate(&config).is_err());
    }
}
