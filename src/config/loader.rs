//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{AppConfig, ServerConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment overrides, e.g. `SERVERS_REST_PORT`.
pub const ENV_PREFIX: &str = "SERVERS";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: String, value: String },

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

/// Load, override from environment, and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_str(&content)
}

/// Same as [`load_config`] for an in-memory document.
pub fn load_config_str(content: &str) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = toml::from_str(content)?;

    apply_env_overrides(&mut config, ENV_PREFIX)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `{prefix}_{SECTION}_{NAME|HOST|PORT}` overrides to every server section.
pub fn apply_env_overrides(config: &mut AppConfig, prefix: &str) -> Result<(), ConfigError> {
    apply_server_env(&mut config.rest, &format!("{}_REST", prefix))?;
    apply_server_env(&mut config.metrics, &format!("{}_METRICS", prefix))?;
    apply_server_env(&mut config.health, &format!("{}_HEALTH", prefix))?;
    Ok(())
}

/// Apply `{prefix}_NAME`, `{prefix}_HOST` and `{prefix}_PORT` to one server.
pub fn apply_server_env(server: &mut ServerConfig, prefix: &str) -> Result<(), ConfigError> {
    if let Ok(name) = std::env::var(format!("{}_NAME", prefix)) {
        server.name = name;
    }
    if let Ok(host) = std::env::var(format!("{}_HOST", prefix)) {
        server.host = host;
    }

    let port_var = format!("{}_PORT", prefix);
    if let Ok(value) = std::env::var(&port_var) {
        server.port = value.trim().parse().map_err(|_| ConfigError::Env {
            var: port_var.clone(),
            value: value.clone(),
        })?;
    }

    Ok(())
}
