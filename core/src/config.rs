//! Client configuration: serde-friendly settings plus environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::CachePolicy;

/// A configuration value could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidVar { name: &'static str, value: String },
}

/// When and how often a connectivity-lost request is re-issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Upper bound on retries after the first attempt. `None` retries until
    /// success, a non-connectivity failure, or cancellation.
    pub max_retries: Option<u32>,
    /// Delay before the first retry, doubled for each one after.
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(5),
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Retry as soon as the network is back, up to `max_retries` times.
    pub fn immediate(max_retries: Option<u32>) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Whether another attempt may follow `retries` retries.
    pub fn allows(&self, retries: u32) -> bool {
        self.max_retries.map_or(true, |max| retries < max)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Everything needed to build a `Client` without writing code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Per-exchange timeout in seconds. `None` waits forever.
    pub timeout_secs: Option<u64>,
    pub allows_cellular_access: bool,
    pub cache_policy: CachePolicy,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: Some(30),
            allows_cellular_access: true,
            cache_policy: CachePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `PATRON_BASE_URL`, `PATRON_TIMEOUT_SECS`
    /// (`0` disables the timeout), `PATRON_ALLOWS_CELLULAR` and
    /// `PATRON_MAX_RETRIES` (`unlimited` disables the bound).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base_url) = lookup("PATRON_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(value) = lookup("PATRON_TIMEOUT_SECS") {
            let secs: u64 = parse("PATRON_TIMEOUT_SECS", value)?;
            config.timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(value) = lookup("PATRON_ALLOWS_CELLULAR") {
            config.allows_cellular_access = parse("PATRON_ALLOWS_CELLULAR", value)?;
        }
        if let Some(value) = lookup("PATRON_MAX_RETRIES") {
            config.retry.max_retries = if value.eq_ignore_ascii_case("unlimited") {
                None
            } else {
                Some(parse("PATRON_MAX_RETRIES", value)?)
            };
        }

        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidVar { name, value })
}
