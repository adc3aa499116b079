use crate::config::types::{
    CacheConfig, Config, CrawlerConfig, InputConfig, OutputConfig, RemoteConfig, SchedulerConfig,
};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_crawler_config(&config.crawler)?;
    validate_cache_config(&config.cache)?;
    validate_remote_config(&config.remote)?;
    validate_input_config(&config.input)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates scheduler timing
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.hourly_quota < 1 {
        return Err(ConfigError::Validation(
            "hourly_quota must be >= 1".to_string(),
        ));
    }

    if config.tick_period_ms == Some(0) {
        return Err(ConfigError::Validation(
            "tick_period_ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates batch and backpressure settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.chunk_size < 1 {
        return Err(ConfigError::Validation(format!(
            "chunk_size must be >= 1, got {}",
            config.chunk_size
        )));
    }

    if config.backpressure_multiple < 1 {
        return Err(ConfigError::Validation(format!(
            "backpressure_multiple must be >= 1, got {}",
            config.backpressure_multiple
        )));
    }

    if config.request_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_ms must be >= 1ms".to_string(),
        ));
    }

    if config.post_flush_size < 1 {
        return Err(ConfigError::Validation(
            "post_flush_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.capacity < 1 {
        return Err(ConfigError::Validation(
            "cache capacity must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates the remote endpoint settings
fn validate_remote_config(config: &RemoteConfig) -> Result<(), ConfigError> {
    if config.endpoint.is_empty() {
        return Err(ConfigError::Validation(
            "endpoint cannot be empty".to_string(),
        ));
    }

    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.table_name.is_empty()
        || !config
            .table_name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "table_name must be a non-empty identifier, got '{}'",
            config.table_name
        )));
    }

    if config.table_definition.is_empty() {
        return Err(ConfigError::Validation(
            "table_definition cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_input_config(config: &InputConfig) -> Result<(), ConfigError> {
    if config.file_pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "file_pattern cannot be empty".to_string(),
        ));
    }

    Regex::new(&config.file_pattern)
        .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", config.file_pattern, e)))?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
