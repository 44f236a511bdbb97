//! Configuration for the RAG console client.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{ClientError, ClientResult};

/// Environment variable overriding the backend base URL.
pub const API_URL_ENV: &str = "RAG_CONSOLE_API_URL";
/// Environment variable holding the rebuild API key.
pub const API_KEY_ENV: &str = "RAG_CONSOLE_API_KEY";
/// Environment variable overriding the SQLite database path.
pub const DB_PATH_ENV: &str = "RAG_CONSOLE_DB";
/// Environment variable overriding the task poll interval (milliseconds).
pub const POLL_MS_ENV: &str = "RAG_CONSOLE_POLL_MS";
/// Environment variable overriding the health poll interval (milliseconds).
pub const HEALTH_MS_ENV: &str = "RAG_CONSOLE_HEALTH_MS";

/// Default backend base URL.
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Top-level configuration for the client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend HTTP settings.
    pub api: ApiConfig,
    /// Task polling settings.
    pub poll: PollConfig,
    /// Health polling settings.
    pub health: HealthConfig,
    /// Query cache settings.
    pub cache: CacheConfig,
    /// Durable storage settings.
    pub storage: StorageConfig,
}

impl ClientConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    /// Returns an error if a variable is present but malformed.
    pub fn from_env() -> ClientResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api.base_url = Url::parse(&url)?;
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.api.api_key = Some(key);
            }
        }
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_millis_env(POLL_MS_ENV)? {
            config.poll.interval = ms;
        }
        if let Some(ms) = parse_millis_env(HEALTH_MS_ENV)? {
            config.health.interval = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the backend base URL.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be parsed.
    pub fn with_base_url(mut self, url: &str) -> ClientResult<Self> {
        self.api.base_url = Url::parse(url)?;
        Ok(self)
    }

    /// Set the rebuild API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api.api_key = Some(key.into());
        self
    }

    /// Set the task poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// Set the SQLite database path.
    #[must_use]
    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.sqlite_path = path.into();
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ClientResult<()> {
        if !matches!(self.api.base_url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidConfig(format!(
                "api.base_url must be http(s), got {}",
                self.api.base_url.scheme()
            )));
        }

        if self.api.request_timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "api.request_timeout must be > 0".to_string(),
            ));
        }

        if self.poll.interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "poll.interval must be > 0".to_string(),
            ));
        }

        if self.health.interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "health.interval must be > 0".to_string(),
            ));
        }

        if self.storage.kv_table.is_empty()
            || !self
                .storage
                .kv_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ClientError::InvalidConfig(format!(
                "storage.kv_table must be a plain identifier, got {:?}",
                self.storage.kv_table
            )));
        }

        Ok(())
    }
}

fn parse_millis_env(name: &str) -> ClientResult<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ClientError::InvalidConfig(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Backend HTTP settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the RAG backend.
    pub base_url: Url,
    /// Request timeout.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    /// API key sent as `X-API-Key` when starting a rebuild.
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL)
                .unwrap_or_else(|_| unreachable!("default URL is valid")),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            api_key: None,
        }
    }
}

/// Task polling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between two status fetches while a task is pending.
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    /// Consecutive fetch failures tolerated before surfacing an error.
    pub max_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_retries: 2,
        }
    }
}

/// Health polling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Delay between two health checks.
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    /// Consecutive failures tolerated before the snapshot reports an error.
    pub max_retries: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            max_retries: 2,
        }
    }
}

/// Query cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// TTL for health responses (seconds).
    pub health_ttl_seconds: u64,
    /// TTL for search results (seconds).
    pub search_ttl_seconds: u64,
    /// Maximum number of cached search queries.
    pub max_search_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_ttl_seconds: 5,
            search_ttl_seconds: 300,
            max_search_entries: 128,
        }
    }
}

/// Durable storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file path.
    pub sqlite_path: PathBuf,
    /// Key-value table name.
    pub kv_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("rag_console.sqlite3"),
            kv_table: "kv_store".to_string(),
        }
    }
}

impl StorageConfig {
    /// Path value selecting a process-local store instead of a file.
    pub const IN_MEMORY: &'static str = ":memory:";

    /// Whether state should not outlive the process.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path.as_os_str() == Self::IN_MEMORY
    }
}

/// Serde module for millisecond `Duration` serialization.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
