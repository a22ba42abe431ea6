//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, timeouts > 0)
//! - Check the upstream address is an absolute http(s) URL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::ServiceConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream.base_url '{0}' is not an absolute http(s) URL")]
    InvalidBaseUrl(String),

    #[error("upstream.api_key must not be empty")]
    MissingApiKey,

    #[error("{0} must be at least 1")]
    ZeroThreshold(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("limiter.max_concurrent must be at least 1")]
    ZeroConcurrency,

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,

    #[error("{field} '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },
}

/// Check every semantic rule, collecting all violations.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.upstream.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
        _ => errors.push(ValidationError::InvalidBaseUrl(
            config.upstream.base_url.clone(),
        )),
    }
    if config.upstream.api_key.trim().is_empty() {
        errors.push(ValidationError::MissingApiKey);
    }
    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroDuration("upstream.request_timeout_secs"));
    }
    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroDuration("upstream.connect_timeout_secs"));
    }

    let breaker = &config.breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::ZeroThreshold("breaker.failure_threshold"));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::ZeroThreshold("breaker.success_threshold"));
    }
    if breaker.recovery_timeout_ms == 0 {
        errors.push(ValidationError::ZeroDuration("breaker.recovery_timeout_ms"));
    }
    if breaker.prune_ttl_secs == 0 {
        errors.push(ValidationError::ZeroDuration("breaker.prune_ttl_secs"));
    }
    if breaker.prune_interval_secs == 0 {
        errors.push(ValidationError::ZeroDuration("breaker.prune_interval_secs"));
    }

    if config.limiter.max_concurrent == 0 {
        errors.push(ValidationError::ZeroConcurrency);
    }

    if config.admin.enabled {
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
        if config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "admin.bind_address",
                value: config.admin.bind_address.clone(),
            });
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
