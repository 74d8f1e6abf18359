//! Configuration for the libvirt exporter.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use virtsight_common::config::{LogFormat, LoggingConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] virtsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Hypervisor connection and polling settings.
    #[serde(default)]
    pub libvirt: LibvirtConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Domain filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hypervisor connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibvirtConfig {
    /// Connection URI (default: "qemu:///system").
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Delay between the end of one collection cycle and the start of the
    /// next, also used as the rate interval (default: 5).
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Path of the `virsh` binary (default: "virsh").
    #[serde(default = "default_virsh_path")]
    pub virsh_path: String,

    /// Upper bound for a single `virsh` invocation (default: 10).
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_uri() -> String {
    "qemu:///system".to_string()
}

fn default_scrape_interval() -> u64 {
    5
}

fn default_virsh_path() -> String {
    "virsh".to_string()
}

fn default_command_timeout() -> u64 {
    10
}

impl LibvirtConfig {
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for LibvirtConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            scrape_interval_secs: default_scrape_interval(),
            virsh_path: default_virsh_path(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9177").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9177".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Domain filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns for domain UUIDs to include (empty = all).
    #[serde(default)]
    pub include_domains: Vec<String>,

    /// Glob patterns for domain UUIDs to exclude.
    #[serde(default)]
    pub exclude_domains: Vec<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = virtsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = virtsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.libvirt.uri.trim().is_empty() {
            return Err(ConfigError::Validation("uri must not be empty".to_string()));
        }

        if self.libvirt.scrape_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "scrape_interval_secs must be > 0".to_string(),
            ));
        }

        if self.libvirt.command_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "command_timeout_secs must be > 0".to_string(),
            ));
        }

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        for pattern in self
            .filters
            .include_domains
            .iter()
            .chain(&self.filters.exclude_domains)
        {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Validation(format!(
                    "Invalid domain pattern '{}': {}",
                    pattern, e
                )));
            }
        }

        Ok(())
    }
}
