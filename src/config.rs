//! Configuration types for pano-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Environment variable holding the metadata API key
pub const API_KEY_ENV: &str = "GMAPS_API_KEY";

/// Environment variable overriding the download directory
pub const DOWNLOAD_PATH_ENV: &str = "GSV_DOWNLOAD_PATH";

/// Street View metadata endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/streetview/metadata";

/// Remote metadata API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Metadata endpoint URL (default: Google Street View metadata endpoint)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Value sent as the `source` query parameter (default: "outdoor")
    #[serde(default = "default_source")]
    pub source: String,

    /// API key; usually supplied through `GMAPS_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            source: default_source(),
            api_key: None,
        }
    }
}

/// Download engine settings (output location, batching, concurrency, retry passes)
///
/// `batch_size` bounds how many points are staged and persisted together;
/// `connection_limit` bounds how many of them are in flight at once. A batch of
/// 200 with a limit of 100 prepares 200 requests and lets 100 run concurrently,
/// and the next batch starts only once all 200 have an outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory for job files (default: "./data")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Points staged and persisted per batch (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum simultaneous requests; must not exceed `batch_size` (default: 50)
    #[serde(default = "default_connection_limit")]
    pub connection_limit: usize,

    /// Timeout for a single metadata request, in milliseconds when serialized (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "millis_serde")]
    pub request_timeout: Duration,

    /// Number of retry passes over failed points after the main pass (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retry passes; pass `k` waits `k * retry_pass_delay` (default: 5 seconds)
    #[serde(default = "default_retry_pass_delay", with = "duration_serde")]
    pub retry_pass_delay: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            batch_size: default_batch_size(),
            connection_limit: default_connection_limit(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_pass_delay: default_retry_pass_delay(),
        }
    }
}

/// Retry configuration for transient request failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Shared-file lock settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long to wait for the lock before failing the batch (default: 10 seconds)
    #[serde(default = "default_lock_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Delay between acquisition attempts (default: 100 milliseconds)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    pub poll_interval: Duration,

    /// Age after which a lock file is considered abandoned (default: 10 minutes, None = never)
    ///
    /// A process killed while holding the lock leaves its lock file behind;
    /// without this, every later run would time out on it.
    #[serde(default = "default_stale_after", with = "optional_duration_serde")]
    pub stale_after: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: default_lock_timeout(),
            poll_interval: default_poll_interval(),
            stale_after: default_stale_after(),
        }
    }
}

/// Completed-artifact cache settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of completed jobs kept in memory (default: 8, 0 disables caching)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

/// Main configuration for [`Downloader`](crate::Downloader)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote metadata API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Download engine settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// In-request retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Shared-file lock settings
    #[serde(default)]
    pub lock: LockConfig,

    /// Completed-artifact cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Defaults overlaid with `GMAPS_API_KEY` and `GSV_DOWNLOAD_PATH`.
    pub fn from_env() -> Self {
        Self::default().with_env(|name| std::env::var(name).ok())
    }

    /// Load a JSON configuration file, then overlay the environment.
    pub fn from_json_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|e| Error::fs("read", &path, e))?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config.with_env(|name| std::env::var(name).ok()))
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.api.api_key = Some(key);
        }
        match lookup(DOWNLOAD_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            Some(dir) => self.download.download_dir = PathBuf::from(dir),
            None => tracing::debug!(
                download_dir = %self.download.download_dir.display(),
                "{} not set, using configured download directory",
                DOWNLOAD_PATH_ENV
            ),
        }
        self
    }

    /// Check the settings the engine relies on.
    ///
    /// `connection_limit` must not exceed `batch_size`: a batch can never have
    /// more requests in flight than it contains.
    pub fn validate(&self) -> Result<()> {
        let download = &self.download;
        if download.batch_size == 0 {
            return Err(Error::config("batch_size", "batch_size must be greater than zero"));
        }
        if download.connection_limit == 0 {
            return Err(Error::config(
                "connection_limit",
                "connection_limit must be greater than zero",
            ));
        }
        if download.connection_limit > download.batch_size {
            return Err(Error::config(
                "connection_limit",
                format!(
                    "connection_limit ({}) cannot be larger than batch_size ({})",
                    download.connection_limit, download.batch_size
                ),
            ));
        }
        if download.request_timeout.is_zero() {
            return Err(Error::config(
                "request_timeout",
                "request_timeout must be greater than zero",
            ));
        }
        if self.lock.poll_interval.is_zero() {
            return Err(Error::config(
                "lock.poll_interval",
                "poll_interval must be greater than zero",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 || !self.retry.backoff_multiplier.is_finite() {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff_multiplier must be a finite value >= 1.0",
            ));
        }
        url::Url::parse(&self.api.endpoint).map_err(|e| {
            Error::config("api.endpoint", format!("invalid endpoint URL {:?}: {e}", self.api.endpoint))
        })?;
        Ok(())
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_source() -> String {
    "outdoor".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_batch_size() -> usize {
    100
}

fn default_connection_limit() -> usize {
    50
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_pass_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_stale_after() -> Option<Duration> {
    Some(Duration::from_secs(600))
}

fn default_cache_capacity() -> usize {
    8
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
