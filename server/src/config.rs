//! Configuration management for the server.

use ferry_engine::store::{APPLIED_RETENTION_MS, MAX_PULL_LIMIT};
use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL. Without one the server keeps its state in
    /// memory.
    pub database_url: Option<String>,
    /// Pool size for the database
    pub database_max_connections: u32,
    /// Entity types clients may read but not write
    pub read_only_entity_types: Vec<String>,
    /// Upper bound for the `limit` of a pull
    pub pull_max_limit: u32,
    /// How long applied change IDs are kept, in milliseconds
    pub applied_retention_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            database_max_connections: 10,
            read_only_entity_types: Vec::new(),
            pull_max_limit: MAX_PULL_LIMIT,
            applied_retention_ms: APPLIED_RETENTION_MS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(port) => port.parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => defaults.port,
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let database_max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "DATABASE_MAX_CONNECTIONS",
                        value: raw,
                    })
                }
            },
            Err(_) => defaults.database_max_connections,
        };

        let read_only_entity_types = env::var("READ_ONLY_ENTITY_TYPES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let pull_max_limit = match env::var("PULL_MAX_LIMIT") {
            Ok(raw) => match raw.parse::<u32>() {
                Ok(limit) if (1..=MAX_PULL_LIMIT).contains(&limit) => limit,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "PULL_MAX_LIMIT",
                        value: raw,
                    })
                }
            },
            Err(_) => defaults.pull_max_limit,
        };

        let applied_retention_ms = match env::var("APPLIED_RETENTION_DAYS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(days) if days > 0 => days * 24 * 60 * 60 * 1000,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "APPLIED_RETENTION_DAYS",
                        value: raw,
                    })
                }
            },
            Err(_) => defaults.applied_retention_ms,
        };

        Ok(Self {
            host,
            port,
            database_url,
            database_max_connections,
            read_only_entity_types,
            pull_max_limit,
            applied_retention_ms,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {name} value: {value}")]
    InvalidValue { name: &'static str, value: String },
}
