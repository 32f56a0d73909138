//! Configuration module

mod parser;

pub use parser::{parse_resource, Resource};

use crate::addr::Destination;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Redirector resource (`proto:host:port`)
    pub redirector: Option<String>,

    /// Manager resource (`proto:host:port`)
    pub manager: Option<String>,

    /// Destination resolved at startup
    pub destination: Destination,

    /// Where the selected target is published
    #[serde(rename = "target-file")]
    pub target_file: PathBuf,

    /// Seconds to wait for a completion before tearing the channel down
    #[serde(rename = "resolve-timeout")]
    pub resolve_timeout: u64,

    /// Seconds between retries after a failed or stalled resolution
    #[serde(rename = "retry-interval")]
    pub retry_interval: u64,

    /// Resolver configuration
    pub dns: DnsConfig,

    /// Log level
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from file (synchronous)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from file (async)
    pub async fn load_async<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_str(&content)
    }

    /// Load from string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for dest in Destination::ALL {
            if let Some(resource) = self.resource(dest) {
                parse_resource(resource)
                    .map_err(|e| Error::config(format!("{}: {}", dest, e)))?;
            }
        }

        if self.resource(self.destination).is_none() {
            return Err(Error::config(format!(
                "Startup destination '{}' has no resource configured",
                self.destination
            )));
        }

        if self.resolve_timeout == 0 {
            return Err(Error::config("resolve-timeout cannot be 0"));
        }
        if self.retry_interval == 0 {
            return Err(Error::config("retry-interval cannot be 0"));
        }

        self.dns.validate()
    }

    /// Configured resource for a destination, ignoring empty strings
    pub fn resource(&self, dest: Destination) -> Option<&str> {
        let resource = match dest {
            Destination::Redirector => self.redirector.as_deref(),
            Destination::Manager => self.manager.as_deref(),
        };
        resource.filter(|r| !r.trim().is_empty())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            redirector: None,
            manager: None,
            destination: Destination::Redirector,
            target_file: PathBuf::from("manager-target.json"),
            resolve_timeout: 15,
            retry_interval: 5,
            dns: DnsConfig::default(),
            log_level: Some("info".to_string()),
        }
    }
}

/// DNS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Nameservers; empty means system configuration
    pub nameserver: Vec<String>,

    /// Per-query timeout in seconds
    pub timeout: u64,

    /// Attempts per query
    pub attempts: usize,

    /// Rotate between nameservers
    pub rotate: bool,

    /// Static hosts consulted before any query
    pub hosts: HashMap<String, String>,
}

impl DnsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(Error::config("dns.timeout cannot be 0"));
        }
        if self.attempts == 0 {
            return Err(Error::config("dns.attempts cannot be 0"));
        }
        Ok(())
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            nameserver: Vec::new(),
            timeout: 5,
            attempts: 2,
            rotate: true,
            hosts: HashMap::new(),
        }
    }
}
