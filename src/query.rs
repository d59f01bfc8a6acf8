use crate::aggregate::{AggregatedResult, Aggregator};
use crate::engine::ProbeEngine;
use crate::inventory::ServerInventory;
use crate::probe::{self, Exchange, Question};
use crate::{Error, RecordType, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use trust_dns_proto::rr::Name;

/// A validated question to put to every server in an inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    domain: String,
    record_type: RecordType,
}

impl Query {
    /// Validate `domain` and parse `record_type` (case-insensitive).
    pub fn new(domain: &str, record_type: &str) -> Result<Self> {
        let record_type: RecordType = record_type.parse()?;
        Self::with_type(domain, record_type)
    }

    pub fn with_type(domain: &str, record_type: RecordType) -> Result<Self> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(Error::InvalidDomain("domain must not be empty".into()));
        }
        Name::from_ascii(domain).map_err(|e| Error::InvalidDomain(format!("{}: {}", domain, e)))?;

        Ok(Self {
            domain: domain.to_string(),
            record_type,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn question(&self) -> Question {
        Question::new(self.domain.clone(), self.record_type)
    }

    /// Look the query up on every server in `inventory` and aggregate the
    /// outcomes. Returns once every server has reported.
    pub async fn execute<E>(
        &self,
        inventory: &ServerInventory,
        engine: &ProbeEngine,
        exchanger: &Arc<E>,
    ) -> AggregatedResult
    where
        E: Exchange + ?Sized + 'static,
    {
        self.execute_until_cancelled(inventory, engine, exchanger, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but stops dispatching lookups once
    /// `cancel` fires. Servers that were never asked are absent from the
    /// result.
    pub async fn execute_until_cancelled<E>(
        &self,
        inventory: &ServerInventory,
        engine: &ProbeEngine,
        exchanger: &Arc<E>,
        cancel: CancellationToken,
    ) -> AggregatedResult
    where
        E: Exchange + ?Sized + 'static,
    {
        let exchanger = Arc::clone(exchanger);
        let question = Arc::new(self.question());

        let rx = engine.dispatch(
            inventory,
            move |server| {
                let exchanger = Arc::clone(&exchanger);
                let question = Arc::clone(&question);
                async move { probe::lookup(&*exchanger, server.address(), &question).await }
            },
            cancel,
        );

        let result = Aggregator::collect(rx).await;
        debug!(
            domain = %self.domain,
            record_type = %self.record_type,
            success = result.summary.success_count,
            errors = result.summary.error_count,
            "query finished"
        );
        result
    }
}

/// Server count bounds for user queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Used when the request does not name a count.
    pub default_servers: usize,
    pub max_servers: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_servers: 200,
            max_servers: 500,
        }
    }
}

/// A query as it arrives from a user, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    pub domain: String,
    pub record_type: Option<String>,
    pub country: Option<String>,
    /// Zero means "use the default".
    pub servers: Option<usize>,
}

impl QueryRequest {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Validate the request and choose the servers to ask.
    ///
    /// Checks run in a fixed order: record type, domain, country filter,
    /// server count, then the random sample. Nothing is probed here, so a
    /// request that fails planning costs no network traffic.
    pub fn plan(&self, inventory: &ServerInventory, limits: QueryLimits) -> Result<(Query, ServerInventory)> {
        let record_type: RecordType = match self.record_type.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.parse()?,
            _ => RecordType::default(),
        };
        let query = Query::with_type(&self.domain, record_type)?;

        let candidates = match self.country.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => inventory.filter_country(c)?,
            _ => inventory.clone(),
        };

        let count = match self.servers {
            None | Some(0) => limits.default_servers.min(candidates.len()),
            Some(n) if n > limits.max_servers => {
                return Err(Error::TooManyServers {
                    requested: n,
                    max: limits.max_servers,
                })
            }
            Some(n) => n,
        };

        let servers = candidates.sample(count)?;
        Ok((query, servers))
    }
}
