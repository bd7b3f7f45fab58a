use crate::config::types::{ApiConfig, AuthConfig, Config, CrawlerConfig, OutputConfig, StoreEntry};
use crate::ConfigError;
use url::Url;

/// Longest a validated session is trusted without a keep-alive call (one day)
pub const MAX_VALIDATION_INTERVAL_SECS: u64 = 86_400;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_auth_config(&config.auth)?;
    validate_output_config(&config.output)?;
    validate_stores(&config.stores)?;
    Ok(())
}

/// Validates retry and pacing settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let positive_counts = [
        ("max-retries", config.max_retries),
        ("transient-retries", config.transient_retries),
        ("max-rate-limit-rounds", config.max_rate_limit_rounds),
        ("max-store-attempts", config.max_store_attempts),
    ];
    for (name, value) in positive_counts {
        if value < 1 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 1, got {}",
                name, value
            )));
        }
    }

    if config.base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "base-delay-ms must be greater than 0".to_string(),
        ));
    }

    if config.transient_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "transient-delay-ms must be greater than 0".to_string(),
        ));
    }

    if config.batch_size == 0 {
        return Err(ConfigError::Validation(
            "batch-size must be greater than 0".to_string(),
        ));
    }

    if config.validation_interval_secs > MAX_VALIDATION_INTERVAL_SECS {
        return Err(ConfigError::Validation(format!(
            "validation-interval-secs must be at most {}, got {}",
            MAX_VALIDATION_INTERVAL_SECS, config.validation_interval_secs
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates the catalog API section
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if base.scheme() != "https" && base.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    if config.keep_alive_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "keep-alive-path cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.origin)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid origin: {}", e)))?;

    if config.product_widgets.is_empty() {
        return Err(ConfigError::Validation(
            "product-widgets must name at least one widget type".to_string(),
        ));
    }

    Ok(())
}

/// Exactly one token source must be configured
fn validate_auth_config(config: &AuthConfig) -> Result<(), ConfigError> {
    let sources = [
        config.token.is_some(),
        config.token_env.is_some(),
        config.command.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();

    if sources != 1 {
        return Err(ConfigError::Validation(format!(
            "auth needs exactly one of token, token-env or command, got {}",
            sources
        )));
    }

    if let Some(command) = &config.command {
        if command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth command cannot be empty".to_string(),
            ));
        }
        if config.command_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "command-timeout-secs must be greater than 0".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    let paths = [
        ("dataset-path", &config.dataset_path),
        ("checkpoint-path", &config.checkpoint_path),
        ("ledger-path", &config.ledger_path),
    ];
    for (name, value) in paths {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    if !(-14..=14).contains(&config.utc_offset_hours) {
        return Err(ConfigError::Validation(format!(
            "utc-offset-hours must be between -14 and 14, got {}",
            config.utc_offset_hours
        )));
    }

    Ok(())
}

/// Validates store entries
fn validate_stores(stores: &[StoreEntry]) -> Result<(), ConfigError> {
    for (index, store) in stores.iter().enumerate() {
        if store.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "store #{} has an empty name",
                index
            )));
        }
        if store.link.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "store '{}' has an empty link",
                store.name
            )));
        }
    }
    Ok(())
}
