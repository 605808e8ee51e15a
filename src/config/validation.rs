use crate::config::types::{
    Config, CrawlerConfig, FetcherConfig, RetryConfig, ShardConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
///
/// Runs before any store is opened, and again after CLI overrides are applied.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_shard_config(&config.shard)?;
    validate_crawler_config(&config.crawler)?;
    validate_retry_config(&config.retry)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates shard assignment
fn validate_shard_config(config: &ShardConfig) -> Result<(), ConfigError> {
    if config.total < 1 {
        return Err(ConfigError::Validation(
            "shard total must be >= 1, got 0".to_string(),
        ));
    }

    if config.index >= config.total {
        return Err(ConfigError::Validation(format!(
            "shard index must be < total ({}), got {}",
            config.total, config.index
        )));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.seeds.is_empty() && config.seed_file.is_none() {
        return Err(ConfigError::Validation(
            "at least one seed title or a seed-file is required".to_string(),
        ));
    }

    if let Some(blank) = config.seeds.iter().position(|s| s.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "seed title #{} is blank",
            blank + 1
        )));
    }

    if matches!(&config.seed_file, Some(path) if path.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "seed-file cannot be empty".to_string(),
        ));
    }

    if !config.delay_seconds.is_finite() || config.delay_seconds < 0.0 {
        return Err(ConfigError::Validation(format!(
            "delay-seconds must be a finite value >= 0, got {}",
            config.delay_seconds
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch-size must be >= 1, got 0".to_string(),
        ));
    }

    if config.fetch_timeout_seconds < 1 {
        return Err(ConfigError::Validation(
            "fetch-timeout-seconds must be >= 1, got 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry/backoff configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1, got 0".to_string(),
        ));
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "multiplier must be >= 1.0, got {}",
            config.multiplier
        )));
    }

    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max-delay-ms ({}) must be >= base-delay-ms ({})",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    Ok(())
}

/// Validates the upstream API settings
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    if !config.base_url.ends_with('/') {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must end with '/'",
            config.base_url
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
