//! Environment-driven configuration (ambient stack, SPEC_FULL §2.1). No
//! config-file format is invented here; this mirrors the teacher lineage's
//! env-driven service configuration, loaded once at process start.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::circuit::BreakerParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(String),
    #[error("invalid value for {var}: {source}")]
    InvalidValue {
        var: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Mandatory; never logged.
    pub database_url: String,
    /// Opt-in: migrations never run unless explicitly requested.
    pub migrate_on_start: bool,
    pub log_format: LogFormat,
    pub breaker_params: BreakerParams,
}

impl Config {
    /// Loads configuration from the process environment. `DATABASE_URL` is
    /// mandatory; everything else has a production-sane default so a
    /// deployment can omit it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let migrate_on_start = std::env::var("MIGRATE_ON_START")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let log_format = match std::env::var("LOG_FORMAT").unwrap_or_default().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let failure_threshold = parse_env_or("BREAKER_FAILURE_THRESHOLD", 5)?;
        let reset_timeout_secs = parse_env_or("BREAKER_RESET_TIMEOUT_SECS", 30)?;
        let half_open_success = parse_env_or("BREAKER_HALF_OPEN_SUCCESS", 2)?;

        Ok(Self {
            database_url,
            migrate_on_start,
            log_format,
            breaker_params: BreakerParams {
                failure_threshold,
                reset_timeout: Duration::from_secs(reset_timeout_secs as u64),
                half_open_success,
            },
        })
    }
}

fn parse_env_or(var: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u32>()
            .map_err(|source| ConfigError::InvalidValue { var: var.to_string(), source }),
        Err(_) => Ok(default),
    }
}
