//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `upstream.base_url`.
pub const ENV_BASE_URL: &str = "FLEET_UPSTREAM_BASE_URL";
/// Environment variable overriding `upstream.api_key`.
pub const ENV_API_KEY: &str = "FLEET_UPSTREAM_API_KEY";
/// Environment variable overriding `admin.api_key`.
pub const ENV_ADMIN_API_KEY: &str = "FLEET_ADMIN_API_KEY";
/// Environment variable overriding `observability.log_level`.
pub const ENV_LOG_LEVEL: &str = "FLEET_LOG_LEVEL";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&content)?;
    finish(config)
}

/// Build configuration from defaults plus environment, for running without a file.
pub fn load_from_env() -> Result<ServiceConfig, ConfigError> {
    finish(ServiceConfig::default())
}

fn finish(mut config: ServiceConfig) -> Result<ServiceConfig, ConfigError> {
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay non-empty values returned by `lookup` onto `config`.
pub fn apply_env_overrides(config: &mut ServiceConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(base_url) = get(ENV_BASE_URL) {
        config.upstream.base_url = base_url;
    }
    if let Some(api_key) = get(ENV_API_KEY) {
        config.upstream.api_key = api_key;
    }
    if let Some(admin_key) = get(ENV_ADMIN_API_KEY) {
        config.admin.api_key = admin_key;
    }
    if let Some(level) = get(ENV_LOG_LEVEL) {
        config.observability.log_level = level;
    }
}
