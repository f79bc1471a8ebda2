//! Configuration for scoutlight components

use crate::common::{Error, Result};
use crate::registry::Key;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `SCOUTLIGHT_LEASE__TTL_SECS=20`.
const ENV_PREFIX: &str = "SCOUTLIGHT";

/// Longest lease a store will grant (etcd's `MaxLeaseTTL`).
pub const MAX_LEASE_TTL: Duration = Duration::from_secs(9_000_000_000);

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordination store connection details
    #[serde(default)]
    pub store: StoreConfig,

    /// Lease and refresh settings
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Namespace every registry key is stored under
    #[serde(default = "default_root_key")]
    pub root_key: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_root_key() -> String {
    "/registry".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            lease: LeaseConfig::default(),
            root_key: default_root_key(),
            log_level: default_log_level(),
        }
    }
}

/// Coordination store endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Hostname or IP address of the store
    #[serde(default = "default_host")]
    pub host: String,

    /// Client port of the store
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    2379
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl StoreConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Lease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Lease time-to-live in seconds
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Extra seconds granted on top of the TTL so an in-flight refresh lands before expiry
    #[serde(default = "default_ttl_buffer")]
    pub ttl_buffer_secs: u64,

    /// Refresh interval in seconds (defaults to the TTL, must not exceed it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,

    /// Consecutive refresh failures before the refresh loop stops (<= 0 disables the limit)
    #[serde(default = "default_max_refresh_failures")]
    pub max_refresh_failures: i64,
}

fn default_ttl() -> u64 {
    12
}
fn default_ttl_buffer() -> u64 {
    4
}
fn default_max_refresh_failures() -> i64 {
    10
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            ttl_buffer_secs: default_ttl_buffer(),
            refresh_interval_secs: None,
            max_refresh_failures: default_max_refresh_failures(),
        }
    }
}

impl LeaseConfig {
    /// Runtime lease settings
    pub fn settings(&self) -> LeaseSettings {
        LeaseSettings {
            ttl: Duration::from_secs(self.ttl_secs),
            ttl_buffer: Duration::from_secs(self.ttl_buffer_secs),
            refresh_interval: Duration::from_secs(
                self.refresh_interval_secs.unwrap_or(self.ttl_secs),
            ),
            max_refresh_failures: self.max_refresh_failures,
        }
    }
}

/// Lease settings as consumed by [`crate::registry::LeaseBackedRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    pub ttl: Duration,
    pub ttl_buffer: Duration,
    pub refresh_interval: Duration,
    pub max_refresh_failures: i64,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        LeaseConfig::default().settings()
    }
}

impl LeaseSettings {
    /// Settings with the given TTL, the default buffer and a refresh interval equal to the TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            refresh_interval: ttl,
            ..Self::default()
        }
    }

    /// TTL requested from the store when granting the lease
    pub fn granted_ttl(&self) -> Result<Duration> {
        self.ttl
            .checked_add(self.ttl_buffer)
            .filter(|ttl| *ttl <= MAX_LEASE_TTL)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "lease ttl {:?} plus buffer {:?} exceeds the maximum of {:?}",
                    self.ttl, self.ttl_buffer, MAX_LEASE_TTL
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::InvalidConfig("lease ttl must be positive".into()));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "refresh interval must be positive".into(),
            ));
        }
        if self.refresh_interval > self.ttl {
            return Err(Error::InvalidConfig(format!(
                "refresh interval {:?} exceeds lease ttl {:?}",
                self.refresh_interval, self.ttl
            )));
        }
        self.granted_ttl()?;
        Ok(())
    }
}

impl Config {
    /// Load configuration: defaults, then an optional TOML file, then `SCOUTLIGHT_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.host.trim().is_empty() {
            return Err(Error::InvalidConfig("store host cannot be empty".into()));
        }
        if self.store.port == 0 {
            return Err(Error::InvalidConfig("store port must be positive".into()));
        }
        self.lease.settings().validate()?;
        self.root()?;
        Ok(())
    }

    /// Parsed root namespace key
    pub fn root(&self) -> Result<Key> {
        Key::create(&self.root_key)
    }
}
