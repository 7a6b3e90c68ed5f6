//! Configuration file parser for ~/.config/sift/config.toml.
//!
//! The config file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are silently ignored by serde, though we log a warning when
//! the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::util::{validate_base_url, UrlValidationError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: UrlValidationError,
    },

    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level client configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the identity service (register/login/logout/refresh).
    pub auth_base_url: String,

    /// Base URL of the listing API.
    pub feed_base_url: String,

    /// Topic that is active before the first explicit fetch.
    pub default_topic: String,

    /// Items requested per listing page.
    pub page_size: u32,

    /// Upper bound for a single network call, in seconds.
    pub request_timeout_secs: u64,

    /// Retries for listing/item fetches on 429 and 5xx responses.
    pub max_retries: u32,

    /// First backoff delay in milliseconds; doubles on every retry.
    pub retry_base_delay_ms: u64,

    /// Path of the session database. `None` uses the config directory.
    pub database_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_base_url: "http://localhost:3001/".to_string(),
            feed_base_url: "https://www.reddit.com".to_string(),
            default_topic: "VueJS".to_string(),
            page_size: 5,
            request_timeout_secs: 20,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            database_path: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Upper bound for `max_retries`; backoff doubles per attempt.
    pub const MAX_RETRIES_LIMIT: u32 = 10;

    const KNOWN_KEYS: [&'static str; 8] = [
        "auth_base_url",
        "feed_base_url",
        "default_topic",
        "page_size",
        "request_timeout_secs",
        "max_retries",
        "retry_base_delay_ms",
        "database_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Values that fail [`Config::validate`] → `Err`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a runaway file
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

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            topic = %config.default_topic,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Check values that would otherwise only fail at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth_url()?;
        self.feed_url()?;
        if self.default_topic.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "default_topic",
                reason: "must not be empty",
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_size",
                reason: "must be at least 1",
            });
        }
        if self.max_retries > Self::MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "max_retries",
                reason: "must be at most 10",
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_secs",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn auth_url(&self) -> Result<Url, ConfigError> {
        validate_base_url(&self.auth_base_url).map_err(|source| ConfigError::InvalidUrl {
            field: "auth_base_url",
            source,
        })
    }

    pub fn feed_url(&self) -> Result<Url, ConfigError> {
        validate_base_url(&self.feed_base_url).map_err(|source| ConfigError::InvalidUrl {
            field: "feed_base_url",
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
