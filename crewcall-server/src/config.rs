//! Server configuration from an optional YAML file plus CLI/env overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cli::Cli;
use crate::ratelimit::RateLimitConfig;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// On-disk schema of `crewcall.yml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub listen_addr: Option<String>,

    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    pub secret: Option<String>,
    pub ttl_secs: Option<u64>,
    pub require_token: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    pub enabled: Option<bool>,
    pub burst: Option<u32>,
    pub per_sec: Option<f64>,
}

impl FileConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signing secret; `None` means a fresh random secret per process
    pub secret: Option<String>,
    pub ttl: Duration,
}

/// Runtime configuration after merging file and CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub request_timeout: Duration,
    pub session: SessionConfig,
    /// Gate passthrough queries on a valid token as well
    pub require_token: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_ADDR.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            session: SessionConfig {
                secret: None,
                ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            },
            require_token: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load the file named by `--config`, if any, then apply CLI overrides
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, cli)
    }

    pub fn merge(file: FileConfig, cli: &Cli) -> Result<Self, ConfigError> {
        let defaults = RateLimitConfig::default();
        let timeout_ms = cli
            .request_timeout_ms
            .or(file.request_timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: "must be positive".into(),
            });
        }

        let rate_limit = RateLimitConfig {
            enabled: cli
                .rate_limit
                .or(file.rate_limit.enabled)
                .unwrap_or(defaults.enabled),
            burst: cli.rate_burst.or(file.rate_limit.burst).unwrap_or(defaults.burst),
            refill_rate: cli
                .rate_per_sec
                .or(file.rate_limit.per_sec)
                .unwrap_or(defaults.refill_rate),
        };
        if rate_limit.enabled && (rate_limit.burst == 0 || rate_limit.refill_rate <= 0.0) {
            return Err(ConfigError::Invalid {
                field: "rate_limit",
                reason: "burst and per_sec must be positive when enabled".into(),
            });
        }

        Ok(Self {
            listen_addr: cli
                .listen_addr
                .clone()
                .or(file.listen_addr)
                .unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            request_timeout: Duration::from_millis(timeout_ms),
            session: SessionConfig {
                secret: cli.session_secret.clone().or(file.session.secret),
                ttl: Duration::from_secs(
                    cli.session_ttl_secs
                        .or(file.session.ttl_secs)
                        .unwrap_or(DEFAULT_SESSION_TTL_SECS),
                ),
            },
            require_token: cli
                .require_token
                .or(file.session.require_token)
                .unwrap_or(false),
            rate_limit,
        })
    }
}
