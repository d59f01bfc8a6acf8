use crate::catalog;
use crate::engine::ProbeEngine;
use crate::probe::{self, Exchange};
use crate::server::ServerRecord;
use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Marker written at the top of every persisted inventory.
pub const GENERATED_HEADER: &str = "#### GENERATED BY resolver-sweep update ####\n\n";

/// Where an inventory comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventorySource {
    /// A YAML list written by [`ServerInventory::persist`].
    File(PathBuf),
    /// A public CSV catalog of nameservers, fetched over HTTP.
    Catalog(String),
}

/// An ordered list of resolvers to probe
///
/// Every operation returns a new inventory; nothing is modified in place.
/// Order is kept as loaded so results are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInventory {
    servers: Vec<ServerRecord>,
}

impl ServerInventory {
    pub fn new(servers: Vec<ServerRecord>) -> Self {
        Self { servers }
    }

    /// Load an inventory from either kind of source.
    pub async fn load(source: &InventorySource) -> Result<Self> {
        match source {
            InventorySource::File(path) => Self::from_file(path),
            InventorySource::Catalog(url) => catalog::fetch(url).await,
        }
    }

    /// Read a YAML list of server records.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let inventory = Self::from_yaml(&data)?;
        info!(path = %path.display(), servers = inventory.len(), "loaded server list");
        Ok(inventory)
    }

    /// Parse a YAML list of server records. Every record needs an address.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let blank = data
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#'));
        if blank {
            return Ok(Self::default());
        }

        let servers: Option<Vec<ServerRecord>> = serde_yaml::from_str(data)?;
        let servers: Vec<ServerRecord> = servers
            .unwrap_or_default()
            .into_iter()
            .map(ServerRecord::normalized)
            .collect();

        if let Some(position) = servers.iter().position(|s| s.address().is_empty()) {
            return Err(Error::InvalidRecord(format!(
                "entry {} has no address",
                position + 1
            )));
        }

        Ok(Self { servers })
    }

    /// Render the inventory in the form [`from_yaml`](Self::from_yaml) reads,
    /// prefixed with the generated-file marker.
    pub fn to_yaml(&self) -> Result<String> {
        let body = serde_yaml::to_string(&self.servers)?;
        Ok(format!("{}{}", GENERATED_HEADER, body))
    }

    /// Replace the file at `path` with this inventory.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = self.to_yaml()?;
        fs::write(path, data).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), servers = self.len(), "saved server list");
        Ok(())
    }

    /// Keep only the servers in `country`, compared case-insensitively.
    ///
    /// An empty result is an error rather than an empty inventory.
    pub fn filter_country(&self, country: &str) -> Result<Self> {
        let wanted = country.trim().to_ascii_uppercase();
        let servers: Vec<ServerRecord> = self
            .servers
            .iter()
            .filter(|s| s.country() == wanted)
            .cloned()
            .collect();

        if servers.is_empty() {
            return Err(Error::NoMatch(country.to_string()));
        }

        Ok(Self { servers })
    }

    /// Pick `n` distinct servers uniformly at random.
    pub fn sample(&self, n: usize) -> Result<Self> {
        self.sample_with_rng(n, &mut rand::thread_rng())
    }

    /// [`sample`](Self::sample) with a caller supplied random source.
    pub fn sample_with_rng<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Self> {
        if n > self.servers.len() {
            return Err(Error::InsufficientServers {
                available: self.servers.len(),
                requested: n,
            });
        }

        let servers = self.servers.choose_multiple(rng, n).cloned().collect();
        Ok(Self { servers })
    }

    /// Health check every server and keep the ones that pass.
    ///
    /// Concurrency and rate come from `engine`. Survivors keep their
    /// original order.
    pub async fn validate<E>(&self, engine: &ProbeEngine, exchanger: &Arc<E>) -> Self
    where
        E: Exchange + ?Sized + 'static,
    {
        let checker = Arc::clone(exchanger);
        let results = engine
            .run(self, move |server| {
                let checker = Arc::clone(&checker);
                async move { probe::health_check(&*checker, server.address()).await }
            })
            .await;

        let passed: HashSet<ServerRecord> = results
            .into_iter()
            .filter_map(|(server, outcome)| outcome.ok().map(|_| server))
            .collect();

        let servers: Vec<ServerRecord> = self
            .servers
            .iter()
            .filter(|s| passed.contains(*s))
            .cloned()
            .collect();

        info!(
            active = servers.len(),
            disabled = self.len() - servers.len(),
            "validated server list"
        );

        Self { servers }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerRecord> {
        self.servers.iter()
    }

    pub fn servers(&self) -> &[ServerRecord] {
        &self.servers
    }

    pub fn contains(&self, server: &ServerRecord) -> bool {
        self.servers.contains(server)
    }
}

impl FromIterator<ServerRecord> for ServerInventory {
    fn from_iter<I: IntoIterator<Item = ServerRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ServerInventory {
    type Item = &'a ServerRecord;
    type IntoIter = std::slice::Iter<'a, ServerRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.servers.iter()
    }
}
