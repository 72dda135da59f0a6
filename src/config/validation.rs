//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject configurations the forwarder cannot serve with (no upstreams)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Reject health settings under which downed upstreams never recover
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ForwardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ForwardConfig;
use crate::upstream::UpstreamAddr;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ForwardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. Upstreams
    if config.upstreams.is_empty() {
        errors.push(ValidationError::new("upstreams", "at least one upstream is required"));
    }
    let mut seen = HashSet::new();
    for (i, raw) in config.upstreams.iter().enumerate() {
        match raw.parse::<UpstreamAddr>() {
            Ok(addr) => {
                if !seen.insert(addr) {
                    errors.push(ValidationError::new(
                        format!("upstreams[{}]", i),
                        format!("duplicate upstream {}", addr),
                    ));
                }
            }
            Err(e) => errors.push(ValidationError::new(format!("upstreams[{}]", i), e.to_string())),
        }
    }

    // 2. Timings
    if config.timeouts.attempt_ms == 0 {
        errors.push(ValidationError::new("timeouts.attempt_ms", "must be greater than 0"));
    }
    if config.health_check.enabled {
        if config.health_check.interval_ms == 0 {
            errors.push(ValidationError::new("health_check.interval_ms", "must be greater than 0"));
        }
        if config.health_check.timeout_ms == 0 {
            errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than 0"));
        }
    } else if config.health_check.failfast_all_unhealthy && config.health_check.max_fails > 0 {
        // nothing would ever mark a downed upstream healthy again
        errors.push(ValidationError::new(
            "health_check.failfast_all_unhealthy",
            "requires health_check.enabled when max_fails > 0",
        ));
    }

    // 3. Listener and endpoints
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.tcp && config.listener.max_tcp_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_tcp_connections",
            "must be greater than 0 when TCP is enabled",
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
