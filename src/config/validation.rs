use crate::config::types::{
    BatchConfig, Config, FetcherKind, GatewayConfig, OutputConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Largest chunk size accepted by the planner
pub const MAX_CHUNK_SIZE: u32 = 1000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_batch_config(&config.batch)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;

    match (config.fetcher.kind, &config.gateway) {
        (FetcherKind::Gateway, None) => {
            return Err(ConfigError::Validation(
                "fetcher kind 'gateway' requires a [gateway] section".to_string(),
            ));
        }
        (_, Some(gateway)) => validate_gateway_config(gateway)?,
        (FetcherKind::Http, None) => {}
    }

    Ok(())
}

/// Validates batch orchestration settings
fn validate_batch_config(config: &BatchConfig) -> Result<(), ConfigError> {
    if config.default_chunk_size < 1 || config.default_chunk_size > MAX_CHUNK_SIZE {
        return Err(ConfigError::Validation(format!(
            "default_chunk_size must be between 1 and {}, got {}",
            MAX_CHUNK_SIZE, config.default_chunk_size
        )));
    }

    if config.max_urls_per_batch < 1 {
        return Err(ConfigError::Validation(
            "max_urls_per_batch must be >= 1".to_string(),
        ));
    }

    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.attempt_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "attempt_timeout_ms must be >= 100ms, got {}ms",
            config.attempt_timeout_ms
        )));
    }

    if let Some(max) = config.backoff_max_ms {
        if max < config.backoff_base_ms {
            return Err(ConfigError::Validation(format!(
                "backoff_max_ms ({}) must not be smaller than backoff_base_ms ({})",
                max, config.backoff_base_ms
            )));
        }
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.agent_name.is_empty() {
        return Err(ConfigError::Validation(
            "agent_name cannot be empty".to_string(),
        ));
    }

    if !config
        .agent_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "agent_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.agent_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.report_dir.is_empty() {
        return Err(ConfigError::Validation(
            "report_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the remote gateway section
fn validate_gateway_config(config: &GatewayConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid gateway base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "gateway base_url must be http or https, got '{}'",
            config.base_url
        )));
    }

    if config.timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "gateway timeout_ms must be >= 100ms, got {}ms",
            config.timeout_ms
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "gateway max_retries must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
