//! Runtime settings
//!
//! Everything tunable lives here and is handed to the engine, the exchanger
//! and the query planner explicitly. Settings can be read from a YAML file;
//! any field left out keeps its default.

use crate::engine::ProbeEngine;
use crate::query::QueryLimits;
use crate::udp::UdpExchanger;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CATALOG_URL: &str = "https://public-dns.info/nameservers.csv";
pub const DEFAULT_RESOLVER_FILE: &str = "config/resolver-list.yml";

/// How individual probes are sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub timeout_ms: u64,
    pub port: u16,
    /// Workers used when validating an inventory.
    pub threads: usize,
    /// Probes per second across the whole pool. Unset means unlimited.
    pub rate: Option<u32>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            port: UdpExchanger::DEFAULT_PORT,
            threads: 200,
            rate: None,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn exchanger(&self) -> UdpExchanger {
        UdpExchanger::new(self.timeout()).with_port(self.port)
    }

    pub fn engine(&self) -> ProbeEngine {
        ProbeEngine::new(self.threads).with_rate(self.rate.unwrap_or(0))
    }
}

/// Limits applied to user queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub default_servers: usize,
    pub max_servers: usize,
    pub threads: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        let limits = QueryLimits::default();
        Self {
            default_servers: limits.default_servers,
            max_servers: limits.max_servers,
            threads: 200,
        }
    }
}

impl QuerySettings {
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            default_servers: self.default_servers,
            max_servers: self.max_servers,
        }
    }

    /// Engine for running queries. Shares the probe rate limit.
    pub fn engine(&self, probe: &ProbeSettings) -> ProbeEngine {
        ProbeEngine::new(self.threads).with_rate(probe.rate.unwrap_or(0))
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub probe: ProbeSettings,
    pub query: QuerySettings,
    pub catalog_url: String,
    pub resolver_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe: ProbeSettings::default(),
            query: QuerySettings::default(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            resolver_file: PathBuf::from(DEFAULT_RESOLVER_FILE),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self = serde_yaml::from_str(data)?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<()> {
        if self.query.default_servers > self.query.max_servers {
            return Err(Error::Config(format!(
                "query.default_servers ({}) exceeds query.max_servers ({})",
                self.query.default_servers, self.query.max_servers
            )));
        }
        if self.probe.timeout_ms == 0 {
            return Err(Error::Config("probe.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
