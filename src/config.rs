//! Client defaults loaded from YAML.
//!
//! ```yaml
//! queries:
//!   stale_time: 30s
//!   gc_time: never
//!   retry:
//!     policy: exponential
//!     max_retries: 5
//!     base: 500ms
//!     cap: 10s
//!   refetch_on_reconnect: always
//! mutations:
//!   retry:
//!     policy: fixed
//!     max_retries: 2
//!     delay: 1s
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::options::{DefaultOptions, MutationConfig, QueryConfig, RefetchPolicy};
use crate::retryer::{NetworkMode, RetryPolicy};
use crate::time::{GcTime, StaleTime};

/// Failure to load a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("config file is empty")]
    Empty,
    #[error("failed to parse config YAML")]
    Parse(#[from] serde_yaml::Error),
    #[error("{section}: retry base delay {base:?} exceeds cap {cap:?}")]
    InvalidBackoff {
        section: &'static str,
        base: Duration,
        cap: Duration,
    },
}

fn default_base() -> Duration {
    RetryPolicy::DEFAULT_BASE
}

fn default_cap() -> Duration {
    RetryPolicy::DEFAULT_CAP
}

/// Serializable form of a [`RetryPolicy`]. Custom resolvers are code-only.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum RetryConfig {
    Never,
    Exponential {
        max_retries: u32,
        #[serde(with = "humantime_serde", default = "default_base")]
        base: Duration,
        #[serde(with = "humantime_serde", default = "default_cap")]
        cap: Duration,
    },
    Fixed {
        max_retries: u32,
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
}

impl RetryConfig {
    fn validate(&self, section: &'static str) -> Result<(), ConfigError> {
        match *self {
            RetryConfig::Exponential { base, cap, .. } if base > cap => {
                Err(ConfigError::InvalidBackoff { section, base, cap })
            }
            _ => Ok(()),
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        match config {
            RetryConfig::Never => RetryPolicy::Never,
            RetryConfig::Exponential {
                max_retries,
                base,
                cap,
            } => RetryPolicy::Exponential {
                max_retries,
                base,
                cap,
            },
            RetryConfig::Fixed { max_retries, delay } => RetryPolicy::Fixed { max_retries, delay },
        }
    }
}

/// Query defaults. Unset fields fall through to the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QueryDefaultsConfig {
    pub stale_time: Option<StaleTime>,
    pub gc_time: Option<GcTime>,
    pub retry: Option<RetryConfig>,
    pub network_mode: Option<NetworkMode>,
    pub enabled: Option<bool>,
    pub refetch_on_mount: Option<RefetchPolicy>,
    pub refetch_on_resume: Option<RefetchPolicy>,
    pub refetch_on_reconnect: Option<RefetchPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MutationDefaultsConfig {
    pub retry: Option<RetryConfig>,
    pub gc_time: Option<GcTime>,
    pub network_mode: Option<NetworkMode>,
}

/// Client-wide defaults as read from a config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub queries: QueryDefaultsConfig,
    pub mutations: MutationDefaultsConfig,
}

impl ClientConfig {
    /// Load from a YAML file, or the defaults when `path` is `None`.
    pub fn get(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_yaml_str(&fs::read_to_string(path)?),
            None => Ok(ClientConfig::default()),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Err(ConfigError::Empty);
        }
        let config: ClientConfig = serde_yaml::from_str(yaml)?;
        if let Some(retry) = &config.queries.retry {
            retry.validate("queries")?;
        }
        if let Some(retry) = &config.mutations.retry {
            retry.validate("mutations")?;
        }
        Ok(config)
    }
}

impl From<QueryDefaultsConfig> for QueryConfig {
    fn from(config: QueryDefaultsConfig) -> Self {
        QueryConfig {
            stale_time: config.stale_time,
            gc_time: config.gc_time,
            retry: config.retry.map(RetryPolicy::from),
            network_mode: config.network_mode,
            enabled: config.enabled,
            refetch_on_mount: config.refetch_on_mount,
            refetch_on_resume: config.refetch_on_resume,
            refetch_on_reconnect: config.refetch_on_reconnect,
        }
    }
}

impl From<MutationDefaultsConfig> for MutationConfig {
    fn from(config: MutationDefaultsConfig) -> Self {
        MutationConfig {
            retry: config.retry.map(RetryPolicy::from),
            gc_time: config.gc_time,
            network_mode: config.network_mode,
        }
    }
}

impl From<ClientConfig> for DefaultOptions {
    fn from(config: ClientConfig) -> Self {
        DefaultOptions {
            queries: config.queries.into(),
            mutations: config.mutations.into(),
        }
    }
}
