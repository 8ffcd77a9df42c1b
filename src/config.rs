// src/config.rs

//! Manages client configuration: loading from TOML, defaults, and validation.
//!
//! A `ClientConfig` is immutable once handed to a `ConnectionManager`. Everything
//! that can be checked without dialing is checked here or when the manager is
//! built, so misconfiguration surfaces before the first operation.

use crate::core::KeeperError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::warn;

/// Retry behaviour applied to each high-level operation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// The fixed part of the delay slept before every attempt after the first.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the uniform random jitter added to `base_delay`.
    #[serde(with = "humantime_serde", default = "default_max_jitter")]
    pub max_jitter: Duration,
    /// Return driver answers such as "node exists" or "bad version" immediately
    /// instead of spending the remaining attempts on them.
    #[serde(default = "default_fail_fast_on_permanent")]
    pub fail_fast_on_permanent: bool,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}
fn default_max_jitter() -> Duration {
    Duration::from_secs(5)
}
fn default_fail_fast_on_permanent() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_jitter: default_max_jitter(),
            fail_fast_on_permanent: default_fail_fast_on_permanent(),
        }
    }
}

/// Paths to the PEM material used for mutual TLS.
///
/// `cert_path` and `key_path` are both-or-neither. When they are set, `ca_path`
/// is required and the target address must name a single host.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
}

impl TlsConfig {
    /// True when a client certificate and key are configured.
    pub fn is_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// The validated client configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Maximum number of high-level operations in flight at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Bound on the whole dial handshake, TCP connect through `Connected`.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Session timeout negotiated with the ensemble.
    #[serde(with = "humantime_serde", default = "default_session_timeout")]
    pub session_timeout: Duration,
    /// Capacity of the per-session notification queue requested from the driver.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// File holding one `scheme:secret` line, injected after each successful dial.
    #[serde(default)]
    pub auth_file: Option<PathBuf>,
    /// Level the host application should apply when it installs its tracing
    /// subscriber. The library never installs one; see `log_filter`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_concurrency_limit() -> usize {
    32
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_session_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_notification_capacity() -> usize {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            connect_timeout: default_connect_timeout(),
            session_timeout: default_session_timeout(),
            notification_capacity: default_notification_capacity(),
            auth_file: None,
            log_level: default_log_level(),
            retry: RetryConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a new `ClientConfig` by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))?;
        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(contents).context("Failed to parse client configuration TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// The configured `log_level` as a filter a host can hand to its subscriber.
    /// Falls back to `INFO` for a level `validate` would reject.
    pub fn log_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::INFO)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// Address-dependent checks (TLS with several hosts) happen when the manager
    /// for a concrete address is built.
    pub fn validate(&self) -> Result<(), KeeperError> {
        if self.concurrency_limit == 0 {
            return Err(KeeperError::Config(
                "concurrency_limit cannot be 0".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(KeeperError::Config("connect_timeout cannot be 0".into()));
        }
        if self.session_timeout.is_zero() {
            return Err(KeeperError::Config("session_timeout cannot be 0".into()));
        }
        if self.log_level.parse::<LevelFilter>().is_err() {
            return Err(KeeperError::Config(format!(
                "log_level '{}' is not a valid level",
                self.log_level
            )));
        }
        if self.notification_capacity == 0 {
            return Err(KeeperError::Config(
                "notification_capacity cannot be 0".into(),
            ));
        }

        match (&self.tls.cert_path, &self.tls.key_path) {
            (Some(_), None) => {
                return Err(KeeperError::Config(
                    "tls.key_path must be set when tls.cert_path is set".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(KeeperError::Config(
                    "tls.cert_path must be set when tls.key_path is set".into(),
                ));
            }
            (Some(cert), Some(key)) => {
                if cert.as_os_str().is_empty() || key.as_os_str().is_empty() {
                    return Err(KeeperError::Config(
                        "tls.cert_path and tls.key_path cannot be empty".into(),
                    ));
                }
                match &self.tls.ca_path {
                    None => {
                        return Err(KeeperError::Config(
                            "tls.ca_path must be set when TLS is enabled".into(),
                        ));
                    }
                    Some(ca) if ca.as_os_str().is_empty() => {
                        return Err(KeeperError::Config("tls.ca_path cannot be empty".into()));
                    }
                    Some(_) => {}
                }
            }
            (None, None) => {
                if self.tls.ca_path.is_some() {
                    warn!("tls.ca_path is set without a client certificate; TLS stays disabled.");
                }
            }
        }

        if let Some(auth_file) = &self.auth_file
            && auth_file.as_os_str().is_empty()
        {
            return Err(KeeperError::Config("auth_file cannot be empty".into()));
        }

        if self.connect_timeout > self.session_timeout * 4 {
            warn!(
                "connect_timeout ({:?}) is much larger than session_timeout ({:?}).",
                self.connect_timeout, self.session_timeout
            );
        }
        Ok(())
    }
}
