//! Engine configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default provider search endpoint (random photos matching a query)
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.unsplash.com/photos/random";

/// Settings shared by every task the scheduler spawns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Provider search endpoint
    pub search_endpoint: String,
    /// Provider access key, sent as `client_id`
    pub client_id: String,
    /// Orientation filter sent with every search
    pub orientation: String,
    /// Largest `count` the provider accepts in one search
    pub max_search_count: usize,
    /// Number of thumbnails fetched at once
    pub thumbnail_concurrency: usize,
    /// Size in bytes of each chunk written during a download
    pub chunk_size: usize,
    /// Deadline for search and thumbnail requests, and for download response headers
    pub request_timeout_secs: u64,
    /// Longest wait for the next body chunk of a download
    pub read_timeout_secs: u64,
    /// HTTP user agent
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            client_id: String::new(),
            orientation: "landscape".to_string(),
            max_search_count: 30, // provider limit for /photos/random
            thumbnail_concurrency: 4,
            chunk_size: 1024,
            request_timeout_secs: 30,
            read_timeout_secs: 30,
            user_agent: concat!("wallgrid/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EngineConfig {
    /// Builds a config from defaults overlaid with environment variables
    ///
    /// Recognised variables: `UNSPLASH_ACCESS_KEY`, `WALLGRID_SEARCH_ENDPOINT`,
    /// `WALLGRID_CHUNK_SIZE`, `WALLGRID_REQUEST_TIMEOUT_SECS`,
    /// `WALLGRID_READ_TIMEOUT_SECS` and `WALLGRID_THUMBNAIL_CONCURRENCY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(key) = lookup("UNSPLASH_ACCESS_KEY") {
            config.client_id = key;
        }
        if let Some(endpoint) = lookup("WALLGRID_SEARCH_ENDPOINT") {
            config.search_endpoint = endpoint;
        }
        if let Some(value) = parse_var(&lookup, "WALLGRID_CHUNK_SIZE")? {
            config.chunk_size = value as usize;
        }
        if let Some(value) = parse_var(&lookup, "WALLGRID_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = value;
        }
        if let Some(value) = parse_var(&lookup, "WALLGRID_READ_TIMEOUT_SECS")? {
            config.read_timeout_secs = value;
        }
        if let Some(value) = parse_var(&lookup, "WALLGRID_THUMBNAIL_CONCURRENCY")? {
            config.thumbnail_concurrency = value as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the tasks cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Zero("chunk_size"));
        }
        if self.thumbnail_concurrency == 0 {
            return Err(ConfigError::Zero("thumbnail_concurrency"));
        }
        if self.max_search_count == 0 {
            return Err(ConfigError::Zero("max_search_count"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}
