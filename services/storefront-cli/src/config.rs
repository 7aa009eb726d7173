//! Configuration types and loading
//!
//! Precedence: CLI args > env vars > config file > defaults.
//! `API_BASE_URL` and `API_LOCALE` override the `[api]` section.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use session::DEFAULT_REFRESH_PATH;
use transport::{DEFAULT_LOCALE_HEADER, HeaderInjection, RetryPolicy, TransportConfig};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Backend connection settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default = "default_locale_header")]
    pub locale_header: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

/// Credential persistence and refresh settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    /// Refresh ahead of expiry by this many seconds. Off when unset.
    #[serde(default)]
    pub proactive_refresh_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            refresh_path: default_refresh_path(),
            refresh_timeout_secs: default_refresh_timeout(),
            proactive_refresh_secs: None,
        }
    }
}

fn default_locale_header() -> String {
    DEFAULT_LOCALE_HEADER.to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay() -> u64 {
    300
}

fn default_retry_max_delay() -> u64 {
    10_000
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_refresh_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("API_BASE_URL") {
            config.api.base_url = url;
        }
        if let Ok(locale) = std::env::var("API_LOCALE") {
            config.api.locale = Some(locale).filter(|l| !l.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.proactive_refresh_secs == Some(0) {
            return Err(common::Error::Config(
                "proactive_refresh_secs must be greater than 0 when set".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("storefront-api.toml")
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.api.base_url.trim_end_matches('/').to_string(),
            locale: self.api.locale.clone(),
            locale_header: self.api.locale_header.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.api.max_retries,
                base_delay: Duration::from_millis(self.api.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.api.retry_max_delay_ms),
            },
            headers: self.headers.clone(),
        }
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.session.refresh_timeout_secs)
    }

    pub fn proactive_refresh(&self) -> Option<Duration> {
        self.session.proactive_refresh_secs.map(Duration::from_secs)
    }
}
