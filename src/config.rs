// src/config.rs

//! Manages daemon configuration: loading, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// What to do when a connection sends a second `InformInit`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateInitPolicy {
    /// Fail the connection with a protocol violation.
    #[default]
    Reject,
    /// Stop and drain the current stream, then start a new one on the same transport.
    Replace,
}

/// Settings applied to every per-connection stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Capacity of the inbound record queue. The connection task waits when it is full.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    /// How long a stopping stream may keep processing work queued before the stop.
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
    #[serde(default)]
    pub duplicate_init: DuplicateInitPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: default_inbound_capacity(),
            drain_timeout: default_drain_timeout(),
            duplicate_init: DuplicateInitPolicy::default(),
        }
    }
}

fn default_inbound_capacity() -> usize {
    1024
}
fn default_drain_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8879
}

/// The resolved daemon configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    /// `0` asks the OS for an ephemeral port; see `port_filename`.
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// If set, the bound port is written here once the listener is up.
    #[serde(default)]
    pub port_filename: Option<PathBuf>,
    /// How long the accept loop waits for connections to finish on shutdown.
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_connections() -> usize {
    64
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            log_level: default_log_level(),
            max_connections: default_max_connections(),
            port_filename: None,
            shutdown_grace: default_shutdown_grace(),
            stream: StreamConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config from '{path}'"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("max_connections cannot be 0"));
        }
        if self.stream.inbound_capacity == 0 {
            return Err(anyhow!("stream.inbound_capacity cannot be 0"));
        }
        if self.stream.drain_timeout.is_zero() {
            warn!("stream.drain_timeout is 0; work queued before a teardown will be dropped.");
        }
        if let Some(path) = &self.port_filename
            && path.as_os_str().is_empty()
        {
            return Err(anyhow!("port_filename cannot be empty"));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
