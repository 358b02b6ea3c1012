//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rate > 0, burst >= 1)
//! - Detect services configured on the same fixed port
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::collections::HashMap;

use crate::config::schema::AppConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("rate_limit.requests_per_second must be positive, got {0}")]
    NonPositiveRate(f64),

    #[error("rate_limit.burst_size must be at least 1")]
    ZeroBurst,

    #[error("observability.log_level '{0}' is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),

    #[error("{first} and {second} both bind port {port}")]
    PortConflict {
        first: String,
        second: String,
        port: u16,
    },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.rate_limit.enabled {
        let rps = config.rate_limit.requests_per_second;
        if rps.is_nan() || rps <= 0.0 {
            errors.push(ValidationError::NonPositiveRate(rps));
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::ZeroBurst);
        }
    }

    let level = config.observability.log_level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    // Port 0 is assigned dynamically and never conflicts.
    let mut seen: HashMap<u16, &str> = HashMap::new();
    for (section, server) in [
        ("rest", &config.rest),
        ("metrics", &config.metrics),
        ("health", &config.health),
    ] {
        if server.port == 0 {
            continue;
        }
        if let Some(first) = seen.insert(server.port, section) {
            errors.push(ValidationError::PortConflict {
                first: first.to_string(),
                second: section.to_string(),
                port: server.port,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
