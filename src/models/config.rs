//! Application configuration structures.
//!
//! Loaded once at startup from TOML, validated, and passed by reference
//! into the orchestrator. Unknown keys are rejected at load time.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Commerce backend (catalog source) settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Messaging platform (sync target) settings
    #[serde(default)]
    pub target: TargetConfig,

    /// Sync run behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// Checkpoint store location
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Result notification settings
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Pull credentials from the environment when present.
    ///
    /// Only secrets are overridable this way; everything else comes from
    /// the config file so a deployment's behavior is reviewable in one place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("SOURCE_AUTH_HEADER") {
            self.source.auth_header_value = value;
        }
        if let Ok(value) = std::env::var("SOURCE_SECRET_VALUE") {
            self.source.secret_header_value = value;
        }
        if let Ok(value) = std::env::var("TARGET_CLIENT_ID") {
            self.target.client_id = value;
        }
        if let Ok(value) = std::env::var("TARGET_CLIENT_SECRET") {
            self.target.client_secret = value;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.source.api_url)
            .map_err(|e| AppError::config(format!("source.api_url is not a URL: {e}")))?;
        Url::parse(&self.source.store_url)
            .map_err(|e| AppError::config(format!("source.store_url is not a URL: {e}")))?;
        Url::parse(&self.target.api_url)
            .map_err(|e| AppError::config(format!("target.api_url is not a URL: {e}")))?;
        if let Some(webhook) = &self.notify.webhook_url {
            Url::parse(webhook)
                .map_err(|e| AppError::config(format!("notify.webhook_url is not a URL: {e}")))?;
        }

        if self.source.page_size == 0 {
            return Err(AppError::config("source.page_size must be > 0"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::config("source.timeout_secs must be > 0"));
        }
        if self.target.timeout_secs == 0 {
            return Err(AppError::config("target.timeout_secs must be > 0"));
        }
        if self.sync.requests_per_minute == 0 {
            return Err(AppError::config("sync.requests_per_minute must be > 0"));
        }
        if self.sync.batch_size == 0 {
            return Err(AppError::config("sync.batch_size must be > 0"));
        }
        if self.sync.lookback_minutes <= 0 {
            return Err(AppError::config("sync.lookback_minutes must be > 0"));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(AppError::config("sync.retry.max_attempts must be > 0"));
        }
        if self.sync.collections_category.trim().is_empty() {
            return Err(AppError::config("sync.collections_category is empty"));
        }
        if self.sync.brand_attribute_code.trim().is_empty() {
            return Err(AppError::config("sync.brand_attribute_code is empty"));
        }
        if self.checkpoint.lease_secs <= 0 {
            return Err(AppError::config("checkpoint.lease_secs must be > 0"));
        }
        Ok(())
    }
}

/// Commerce backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Base URL of the backend's REST API
    #[serde(default = "defaults::source_api_url")]
    pub api_url: String,

    /// Public storefront URL, used to build product and image links
    #[serde(default = "defaults::source_store_url")]
    pub store_url: String,

    /// Value for the Authorization header
    #[serde(default)]
    pub auth_header_value: String,

    /// Name of the deployment-specific secret header, if any
    #[serde(default)]
    pub secret_header_name: String,

    /// Value for the secret header
    #[serde(default)]
    pub secret_header_value: String,

    /// Store code segment used in API paths
    #[serde(default = "defaults::store_code")]
    pub store_code: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Page size for paged catalog queries
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::source_api_url(),
            store_url: defaults::source_store_url(),
            auth_header_value: String::new(),
            secret_header_name: String::new(),
            secret_header_value: String::new(),
            store_code: defaults::store_code(),
            timeout_secs: defaults::timeout(),
            page_size: defaults::page_size(),
        }
    }
}

/// Messaging platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Batch upsert endpoint of the platform's product API
    #[serde(default = "defaults::target_api_url")]
    pub api_url: String,

    /// OpenAPI client id header value
    #[serde(default)]
    pub client_id: String,

    /// OpenAPI client secret header value
    #[serde(default)]
    pub client_secret: String,

    /// API version sent in the Accept header
    #[serde(default = "defaults::accept_version")]
    pub accept_version: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::target_api_url(),
            client_id: String::new(),
            client_secret: String::new(),
            accept_version: defaults::accept_version(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Sync run behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Number of records submitted to the target per batch
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Outbound request ceiling shared by every upstream and downstream
    /// client, in requests per minute
    #[serde(default = "defaults::requests_per_minute")]
    pub requests_per_minute: u32,

    /// Incremental window: sync products updated within the last N minutes
    #[serde(default = "defaults::lookback_minutes")]
    pub lookback_minutes: i64,

    /// Feature keys stripped from every assembled record
    #[serde(default)]
    pub excluded_feature_keys: Vec<String>,

    /// Parent category whose subtree is tagged as collections
    #[serde(default = "defaults::collections_category")]
    pub collections_category: String,

    /// Attribute code holding the brand option id
    #[serde(default = "defaults::brand_attribute_code")]
    pub brand_attribute_code: String,

    /// Website id used to select the applicable price entry
    #[serde(default = "defaults::website_id")]
    pub website_id: u64,

    /// Retry behavior for transient network failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            requests_per_minute: defaults::requests_per_minute(),
            lookback_minutes: defaults::lookback_minutes(),
            excluded_feature_keys: Vec::new(),
            collections_category: defaults::collections_category(),
            brand_attribute_code: defaults::brand_attribute_code(),
            website_id: defaults::website_id(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for the backoff delay, in milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
        }
    }
}

/// Checkpoint store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Directory (or bucket prefix) holding manifests and the run lock
    #[serde(default = "defaults::checkpoint_dir")]
    pub dir: String,

    /// Run lock lease duration; an older lease is considered abandoned
    #[serde(default = "defaults::lease_secs")]
    pub lease_secs: i64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: defaults::checkpoint_dir(),
            lease_secs: defaults::lease_secs(),
        }
    }
}

/// Result notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    /// Webhook receiving the run result payload; unset disables notification
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Webhook request timeout in seconds
    #[serde(default = "defaults::notify_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: defaults::notify_timeout(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum console log level
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Show per-batch progress lines
    #[serde(default = "defaults::show_progress")]
    pub show_progress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            show_progress: defaults::show_progress(),
        }
    }
}

mod defaults {
    // Source defaults
    pub fn source_api_url() -> String {
        "https://shop.example.com/rest".into()
    }
    pub fn source_store_url() -> String {
        "https://shop.example.com".into()
    }
    pub fn store_code() -> String {
        "default".into()
    }
    pub fn page_size() -> usize {
        200
    }

    // Target defaults
    pub fn target_api_url() -> String {
        "https://api.messaging.example.com/products/batch".into()
    }
    pub fn accept_version() -> String {
        "1".into()
    }
    pub fn requests_per_minute() -> u32 {
        60
    }

    // Shared
    pub fn timeout() -> u64 {
        30
    }

    // Sync defaults
    pub fn batch_size() -> usize {
        100
    }
    pub fn lookback_minutes() -> i64 {
        240
    }
    pub fn collections_category() -> String {
        "Collections".into()
    }
    pub fn brand_attribute_code() -> String {
        "brand".into()
    }
    pub fn website_id() -> u64 {
        1
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn base_delay_ms() -> u64 {
        500
    }
    pub fn max_delay_ms() -> u64 {
        30_000
    }

    // Checkpoint defaults
    pub fn checkpoint_dir() -> String {
        "checkpoints".into()
    }
    pub fn lease_secs() -> i64 {
        900
    }

    // Notify defaults
    pub fn notify_timeout() -> u64 {
        10
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn show_progress() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_api_url() {
        let mut config = Config::default();
        config.target.api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_rate_limit() {
        let mut config = Config::default();
        config.sync.requests_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        let toml = r#"
            [sync]
            batch_size = 50
            exclusions = ["typo_for_excluded_feature_keys"]
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml = r#"
            [sync]
            batch_size = 50
            requests_per_minute = 30
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.requests_per_minute, 30);
        assert_eq!(config.sync.lookback_minutes, 240);
        assert_eq!(config.source.page_size, 200);
    }
}
