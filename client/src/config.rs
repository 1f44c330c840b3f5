//! Configuration management for the sync client.

use crate::error::ConfigError;
use ferry_engine::{EntityType, DEFAULT_BATCH_SIZE, DEFAULT_CAPACITY, DEFAULT_MAX_AGE_MS};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How often the periodic scheduler runs a cycle.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on a single transport call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// First retry delay after a failed cycle.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Behaviour of the sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between periodic cycles
    pub sync_interval: Duration,
    /// Changes transmitted per push
    pub batch_size: usize,
    /// Timeout applied to every transport call
    pub request_timeout: Duration,
    /// Entity types to pull and to load on a full sync (empty pulls all)
    pub entity_types: Vec<EntityType>,
    /// Entity types a full sync keeps in the cache
    pub preserved_types: Vec<EntityType>,
    /// Changes requested per pull page
    pub pull_limit: u32,
    /// Pull pages followed per cycle
    pub max_pull_pages: usize,
    /// Entities requested per full-sync page
    pub page_size: u32,
    /// Cached entities older than this are evicted by cleanup
    pub max_cache_age: Duration,
    /// First retry delay after a failed periodic cycle
    pub backoff_initial: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            entity_types: Vec::new(),
            preserved_types: vec!["user_settings".to_string()],
            pull_limit: 100,
            max_pull_pages: 50,
            page_size: 100,
            max_cache_age: Duration::from_millis(DEFAULT_MAX_AGE_MS),
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the store server
    pub base_url: String,
    /// Coordinator settings
    pub sync: SyncConfig,
    /// Entities cached per entity type
    pub cache_capacity: usize,
    /// Where the agent persists its cache snapshot
    pub snapshot_path: Option<PathBuf>,
    /// JSON merge schema to load at start
    pub schema_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            sync: SyncConfig::default(),
            cache_capacity: DEFAULT_CAPACITY,
            snapshot_path: None,
            schema_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut sync = defaults.sync;

        if let Some(secs) = parse_var::<u64>("FERRY_SYNC_INTERVAL_SECS")? {
            sync.sync_interval = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<usize>("FERRY_BATCH_SIZE")? {
            if size == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "FERRY_BATCH_SIZE",
                    value: "0".into(),
                });
            }
            sync.batch_size = size;
        }
        if let Some(ms) = parse_var::<u64>("FERRY_REQUEST_TIMEOUT_MS")? {
            sync.request_timeout = Duration::from_millis(ms);
        }
        if let Ok(types) = env::var("FERRY_ENTITY_TYPES") {
            sync.entity_types = split_list(&types);
        }

        let base_url = env::var("FERRY_BASE_URL").unwrap_or(defaults.base_url);
        let cache_capacity =
            parse_var::<usize>("FERRY_CACHE_CAPACITY")?.unwrap_or(defaults.cache_capacity);
        let snapshot_path = env::var("FERRY_SNAPSHOT_PATH").ok().map(PathBuf::from);
        let schema_path = env::var("FERRY_SCHEMA_PATH").ok().map(PathBuf::from);

        Ok(Self {
            base_url,
            sync,
            cache_capacity,
            snapshot_path,
            schema_path,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
