use crate::config::types::{Config, ScheduleConfig, ServerConfig, StorageConfig, UpstreamConfig};
use crate::ConfigError;
use std::net::SocketAddr;
use url::Url;

/// Longest query text accepted as the default query
pub const MAX_QUERY_LEN: usize = 100;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_query(&config.default_query)?;
    validate_upstream_config(&config.upstream)?;
    validate_schedule_config(&config.schedule)?;
    validate_storage_config(&config.storage)?;
    validate_server_config(&config.server)?;
    Ok(())
}

/// Validates a tracked query string
pub fn validate_query(query: &str) -> Result<(), ConfigError> {
    if query.trim().is_empty() {
        return Err(ConfigError::Validation(
            "query cannot be empty".to_string(),
        ));
    }

    if query.chars().count() > MAX_QUERY_LEN {
        return Err(ConfigError::Validation(format!(
            "query must be at most {} characters, got {}",
            MAX_QUERY_LEN,
            query.chars().count()
        )));
    }

    Ok(())
}

/// Validates upstream API configuration
fn validate_upstream_config(config: &UpstreamConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url '{}' must use http or https",
            config.base_url
        )));
    }

    let credentials = config.credentials();
    if credentials.is_empty() {
        return Err(ConfigError::Validation(
            "at least one credential must be set via api_keys or api_key".to_string(),
        ));
    }

    if credentials.iter().any(|key| key.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "credentials cannot be blank".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates schedule configuration
fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    if config.interval_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "interval_secs must be >= 1, got {}",
            config.interval_secs
        )));
    }

    if config.tick_millis < 10 || config.tick_millis > 60_000 {
        return Err(ConfigError::Validation(format!(
            "tick_millis must be between 10 and 60000, got {}",
            config.tick_millis
        )));
    }

    if config.max_quota_retries < 1 {
        return Err(ConfigError::Validation(
            "max_quota_retries must be >= 1".to_string(),
        ));
    }

    if config.cycle_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "cycle_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates server configuration
fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    config.bind_address.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!(
            "Invalid bind_address '{}': {}",
            config.bind_address, e
        ))
    })?;

    Ok(())
}
