//! Configuration loading for the repo tracker.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `REPO_TRACKER_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{JitterStrategy, RetryPolicy};

const ENV_PREFIX: &str = "REPO_TRACKER_";

/// Application configuration derived from `REPO_TRACKER_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// GitHub REST API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
    /// Optional token; unauthenticated requests are heavily rate limited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_github_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Refresh workflow scheduling and fetch retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RefreshConfig {
    /// Seconds between scheduled workflow runs (default: 21600, six hours)
    #[serde(default = "default_refresh_interval_seconds")]
    pub interval_seconds: u64,
    /// Maximum repositories processed concurrently within one run
    #[serde(default = "default_refresh_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_fetch_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_fetch_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_fetch_retry_backoff_rate")]
    pub retry_backoff_rate: f64,
    #[serde(default)]
    pub retry_jitter: JitterStrategy,
}

/// Which transport delivers notifications to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// WebSocket sessions held by this process
    #[default]
    Local,
    /// Remote connection-management endpoint (`POST {endpoint}/@connections/{id}`)
    Gateway,
}

/// Subscriber registry and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NotificationConfig {
    /// Lifetime of a subscriber registration in seconds (default: 3600)
    #[serde(default = "default_connection_ttl_seconds")]
    pub connection_ttl_seconds: u64,
    /// How often expired registrations are purged (default: 300)
    #[serde(default = "default_connection_reaper_interval_seconds")]
    pub reaper_interval_seconds: u64,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_endpoint: Option<String>,
    #[serde(default = "default_notify_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            github: GitHubConfig::default(),
            refresh: RefreshConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api_base(),
            token: None,
            timeout_seconds: default_github_timeout_seconds(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_refresh_interval_seconds(),
            max_concurrency: default_refresh_max_concurrency(),
            retry_max_attempts: default_fetch_retry_max_attempts(),
            retry_interval_ms: default_fetch_retry_interval_ms(),
            retry_backoff_rate: default_fetch_retry_backoff_rate(),
            retry_jitter: JitterStrategy::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            connection_ttl_seconds: default_connection_ttl_seconds(),
            reaper_interval_seconds: default_connection_reaper_interval_seconds(),
            transport: TransportKind::default(),
            gateway_endpoint: None,
            timeout_seconds: default_notify_timeout_seconds(),
        }
    }
}

impl RefreshConfig {
    /// Builds the retry policy applied to upstream fetches.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            interval: Duration::from_millis(self.retry_interval_ms),
            backoff_rate: self.retry_backoff_rate,
            jitter: self.retry_jitter,
        }
    }

    /// Validate refresh configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds < 60 {
            return Err(ConfigError::InvalidRefreshInterval {
                value: self.interval_seconds,
            });
        }

        if self.max_concurrency == 0 || self.max_concurrency > 64 {
            return Err(ConfigError::InvalidRefreshConcurrency {
                value: self.max_concurrency,
            });
        }

        if self.retry_max_attempts == 0 || self.retry_max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.retry_max_attempts,
            });
        }

        if !self.retry_backoff_rate.is_finite() || self.retry_backoff_rate < 1.0 {
            return Err(ConfigError::InvalidRetryBackoffRate {
                value: self.retry_backoff_rate,
            });
        }

        Ok(())
    }
}

impl NotificationConfig {
    /// Validate subscriber registry and transport settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_ttl_seconds < 60 {
            return Err(ConfigError::InvalidConnectionTtl {
                value: self.connection_ttl_seconds,
            });
        }

        if self.reaper_interval_seconds == 0 {
            return Err(ConfigError::InvalidReaperInterval {
                value: self.reaper_interval_seconds,
            });
        }

        if self.transport == TransportKind::Gateway {
            let endpoint = self
                .gateway_endpoint
                .as_deref()
                .ok_or(ConfigError::MissingGatewayEndpoint)?;
            url::Url::parse(endpoint).map_err(|source| ConfigError::InvalidGatewayEndpoint {
                value: endpoint.to_string(),
                source,
            })?;
        }

        Ok(())
    }
}

impl AppConfig {
    /// Parses the configured bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Serializes the configuration with secrets replaced.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.github.token.is_some() {
            config.github.token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error for out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        url::Url::parse(&self.github.api_base).map_err(|source| {
            ConfigError::InvalidGitHubApiBase {
                value: self.github.api_base.clone(),
                source,
            }
        })?;

        self.refresh.validate()?;
        self.notifications.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://repo-tracker.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_github_timeout_seconds() -> u64 {
    10
}

fn default_refresh_interval_seconds() -> u64 {
    21600 // 6 hours
}

fn default_refresh_max_concurrency() -> usize {
    8
}

fn default_fetch_retry_max_attempts() -> u32 {
    3
}

fn default_fetch_retry_interval_ms() -> u64 {
    1000
}

fn default_fetch_retry_backoff_rate() -> f64 {
    2.0
}

fn default_connection_ttl_seconds() -> u64 {
    3600 // 1 hour
}

fn default_connection_reaper_interval_seconds() -> u64 {
    300
}

fn default_notify_timeout_seconds() -> u64 {
    5
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid GitHub API base '{value}': {source}")]
    InvalidGitHubApiBase {
        value: String,
        source: url::ParseError,
    },
    #[error("refresh interval must be at least 60 seconds, got {value}")]
    InvalidRefreshInterval { value: u64 },
    #[error("refresh concurrency must be between 1 and 64, got {value}")]
    InvalidRefreshConcurrency { value: usize },
    #[error("fetch retry attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("fetch retry backoff rate must be a finite number of at least 1.0, got {value}")]
    InvalidRetryBackoffRate { value: f64 },
    #[error("unknown retry jitter strategy '{value}'; expected 'full' or 'none'")]
    InvalidRetryJitter { value: String },
    #[error("connection TTL must be at least 60 seconds, got {value}")]
    InvalidConnectionTtl { value: u64 },
    #[error("connection reaper interval must be positive, got {value}")]
    InvalidReaperInterval { value: u64 },
    #[error("unknown notification transport '{value}'; expected 'local' or 'gateway'")]
    InvalidTransport { value: String },
    #[error(
        "gateway transport selected but no endpoint configured; set REPO_TRACKER_NOTIFY_GATEWAY_ENDPOINT"
    )]
    MissingGatewayEndpoint,
    #[error("invalid gateway endpoint '{value}': {source}")]
    InvalidGatewayEndpoint {
        value: String,
        source: url::ParseError,
    },
}

/// Loads configuration using layered `.env` files and `REPO_TRACKER_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration: `.env`, `.env.local`, `.env.{profile}`,
    /// `.env.{profile}.local`, then the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let github = GitHubConfig {
            api_base: take_string(&mut layered, "GITHUB_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(default_github_api_base),
            token: take_string(&mut layered, "GITHUB_TOKEN"),
            timeout_seconds: take_parsed(&mut layered, "GITHUB_TIMEOUT_SECONDS")
                .unwrap_or_else(default_github_timeout_seconds),
        };

        let retry_jitter = match take_string(&mut layered, "FETCH_RETRY_JITTER") {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "full" => JitterStrategy::Full,
                "none" => JitterStrategy::None,
                _ => return Err(ConfigError::InvalidRetryJitter { value }),
            },
            None => JitterStrategy::default(),
        };

        let refresh = RefreshConfig {
            interval_seconds: take_parsed(&mut layered, "REFRESH_INTERVAL_SECONDS")
                .unwrap_or_else(default_refresh_interval_seconds),
            max_concurrency: take_parsed(&mut layered, "REFRESH_MAX_CONCURRENCY")
                .unwrap_or_else(default_refresh_max_concurrency),
            retry_max_attempts: take_parsed(&mut layered, "FETCH_RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(default_fetch_retry_max_attempts),
            retry_interval_ms: take_parsed(&mut layered, "FETCH_RETRY_INTERVAL_MS")
                .unwrap_or_else(default_fetch_retry_interval_ms),
            retry_backoff_rate: take_parsed(&mut layered, "FETCH_RETRY_BACKOFF_RATE")
                .unwrap_or_else(default_fetch_retry_backoff_rate),
            retry_jitter,
        };

        let transport = match take_string(&mut layered, "NOTIFY_TRANSPORT") {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "local" => TransportKind::Local,
                "gateway" => TransportKind::Gateway,
                _ => return Err(ConfigError::InvalidTransport { value }),
            },
            None => TransportKind::default(),
        };

        let notifications = NotificationConfig {
            connection_ttl_seconds: take_parsed(&mut layered, "CONNECTION_TTL_SECONDS")
                .unwrap_or_else(default_connection_ttl_seconds),
            reaper_interval_seconds: take_parsed(
                &mut layered,
                "CONNECTION_REAPER_INTERVAL_SECONDS",
            )
            .unwrap_or_else(default_connection_reaper_interval_seconds),
            transport,
            gateway_endpoint: take_string(&mut layered, "NOTIFY_GATEWAY_ENDPOINT"),
            timeout_seconds: take_parsed(&mut layered, "NOTIFY_TIMEOUT_SECONDS")
                .unwrap_or_else(default_notify_timeout_seconds),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            github,
            refresh,
            notifications,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a key, treating blank values as unset.
fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Removes and parses a key; unparsable values fall back to the default.
fn take_parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Option<T> {
    layered.remove(key).and_then(|value| value.trim().parse().ok())
}
