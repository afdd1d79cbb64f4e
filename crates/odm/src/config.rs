//! Configuration for the mapping layer.
//!
//! All sections deserialize with defaults, so an empty JSON object is a
//! valid configuration.
//!
//! # Example
//!
//! ```
//! use helios_odm::config::{OdmConfig, UnexpectedSplitKey};
//!
//! let config = OdmConfig::from_json_str(r#"{
//!     "routing": { "separator": "-", "unexpected_split_key": "reject" },
//!     "parallel": { "max_workers": 4 },
//!     "retry": { "initial_delay": "50ms" }
//! }"#).unwrap();
//!
//! assert_eq!(config.routing.separator, "-");
//! assert_eq!(config.routing.unexpected_split_key, UnexpectedSplitKey::Reject);
//! assert_eq!(config.parallel.max_workers, Some(4));
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StorageResult;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OdmConfig {
    /// Collection routing settings.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Parallel query coordinator settings.
    #[serde(default)]
    pub parallel: ParallelConfig,

    /// Retry settings for transient conflicts.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl OdmConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON.
    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the routing section.
    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the parallel section.
    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the retry section.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// What to do when a split key is supplied for an entity that is not split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnexpectedSplitKey {
    /// Route to the base collection and drop the key.
    #[default]
    Ignore,
    /// Fail with `RoutingError::UnexpectedSplitKey`.
    Reject,
}

/// Collection routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Separator placed between the base collection name and the split key.
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Policy for split keys on non-split entities.
    #[serde(default)]
    pub unexpected_split_key: UnexpectedSplitKey,

    /// Whether routing to a capped entity ensures the capped collection exists.
    #[serde(default = "default_true")]
    pub ensure_capped: bool,

    /// Maximum length of a resolved collection name.
    #[serde(default = "default_max_collection_name_length")]
    pub max_collection_name_length: usize,

    /// Pattern a normalized split key must match.
    #[serde(default = "default_split_key_pattern")]
    pub split_key_pattern: String,
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_collection_name_length() -> usize {
    120
}

fn default_split_key_pattern() -> String {
    r"^[A-Za-z0-9_\-]+$".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            unexpected_split_key: UnexpectedSplitKey::default(),
            ensure_capped: true,
            max_collection_name_length: default_max_collection_name_length(),
            split_key_pattern: default_split_key_pattern(),
        }
    }
}

impl RoutingConfig {
    /// Sets the separator.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Rejects split keys on non-split entities.
    pub fn rejecting_unexpected_keys(mut self) -> Self {
        self.unexpected_split_key = UnexpectedSplitKey::Reject;
        self
    }
}

/// Parallel query coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Upper bound on the worker pool, applied after the
    /// `min(tasks, 2 * parallelism + 1)` sizing rule.
    #[serde(default)]
    pub max_workers: Option<usize>,
}

/// Retry configuration for transient conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries.
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration",
        default = "default_initial_delay"
    )]
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration",
        default = "default_max_delay"
    )]
    pub max_delay: Duration,

    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Returns the delay before the given retry attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

fn serialize_duration<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}
