//! Configuration file parser for ~/.config/feedscout/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown top-level keys are ignored by serde, with a warning logged for
//! each one since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_EXTENSION;
use crate::feed::{
    DiscoveryPolicy, Heuristics, HttpSettings, LoadSettings, LocatorBuilder, DEFAULT_MAX_CHECKED,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discovery strategies, as names (`["autodiscovery", "local-body"]`) or a bitmask.
    pub policy: DiscoveryPolicy,

    /// Upper bound on candidate fetches per discovery run.
    pub max_checked_feeds: usize,

    /// Accept whatever the URL serves as the feed, skipping discovery.
    pub force_feed: bool,

    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub heuristics: Heuristics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: DiscoveryPolicy::ALL,
            max_checked_feeds: DEFAULT_MAX_CHECKED,
            force_feed: false,
            http: HttpConfig::default(),
            cache: CacheConfig::default(),
            heuristics: Heuristics::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
    pub max_retries: u32,
    pub user_agent: String,
    /// Allow fetching localhost and private network addresses.
    pub allow_private_hosts: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let defaults = HttpSettings::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            max_body_bytes: defaults.max_body_bytes,
            max_retries: defaults.max_retries,
            user_agent: defaults.user_agent,
            allow_private_hosts: defaults.allow_private_hosts,
        }
    }
}

/// Which built-in cache implementation to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    /// Logical cache location; the database path for the sqlite backend.
    pub location: String,
    /// Entry limit for the memory backend.
    pub capacity: usize,
    /// Max-age applied when a response has no `Cache-Control: max-age`.
    pub default_max_age_secs: u64,
    pub extension: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            location: "cache".to_string(),
            capacity: crate::cache::MemoryCache::DEFAULT_CAPACITY,
            default_max_age_secs: 3600,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "policy",
        "max_checked_feeds",
        "force_feed",
        "http",
        "cache",
        "heuristics",
    ];

    /// Default config path: `$HOME/.config/feedscout/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("feedscout")
                .join("config.toml")
        })
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            path = %path.display(),
            policy = ?config.policy,
            cache = ?config.cache.backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.http.timeout_secs),
            max_body_bytes: self.http.max_body_bytes,
            max_retries: self.http.max_retries,
            user_agent: self.http.user_agent.clone(),
            allow_private_hosts: self.http.allow_private_hosts,
        }
    }

    pub fn locator_builder(&self) -> LocatorBuilder {
        LocatorBuilder {
            heuristics: self.heuristics.clone(),
            max_checked: self.max_checked_feeds,
        }
    }

    pub fn load_settings(&self) -> LoadSettings {
        LoadSettings {
            policy: self.policy,
            use_cache: self.cache.enabled,
            cache_location: self.cache.location.clone(),
            cache_extension: self.cache.extension.clone(),
            default_max_age: Some(Duration::from_secs(self.cache.default_max_age_secs)),
            force_feed: self.force_feed,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
