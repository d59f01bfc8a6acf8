//! # Resolver Sweep
//!
//! Ask a large inventory of independent DNS resolvers the same question and
//! collate what they say. Useful for spotting censorship, hijacking or plain
//! inconsistency between resolvers, and for keeping a list of public
//! resolvers pruned down to the ones that actually answer.
//!
//! ## Features
//!
//! - Resolver inventories loaded from YAML or from a public CSV catalog
//! - Country filtering and uniform random sampling
//! - Bounded, optionally rate limited, concurrent probe engine
//! - Deduplicated summaries of answers and classified failures
//! - Reliability validation that prunes unreachable resolvers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resolver_sweep::{ProbeEngine, Query, ServerInventory, UdpExchanger};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let inventory = ServerInventory::from_file("config/resolver-list.yml")?;
//!     let sample = inventory.sample(50)?;
//!
//!     let query = Query::new("example.com", "A")?;
//!     let engine = ProbeEngine::new(50);
//!     let exchanger = Arc::new(UdpExchanger::new(Duration::from_secs(2)));
//!
//!     let result = query.execute(&sample, &engine, &exchanger).await;
//!     println!("{}", result.to_text_summary(&query));
//!     Ok(())
//! }
//! ```
//!
//! ## Pruning an Inventory
//!
//! ```rust,no_run
//! use resolver_sweep::{catalog, ProbeEngine, UdpExchanger};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let candidates = catalog::fetch("https://public-dns.info/nameservers.csv").await?;
//!     let engine = ProbeEngine::new(200).with_rate(500);
//!     let exchanger = Arc::new(UdpExchanger::new(Duration::from_secs(2)));
//!
//!     let working = candidates.validate(&engine, &exchanger).await;
//!     working.persist("config/resolver-list.yml")?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "api")]
pub mod api;
pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod inventory;
pub mod probe;
pub mod query;
pub mod server;
mod udp;

// Re-export main types
pub use aggregate::{AggregatedResult, Aggregator, Outcome, Summary};
pub use config::Settings;
pub use engine::ProbeEngine;
pub use inventory::{InventorySource, ServerInventory};
pub use probe::{ErrorKind, Exchange, Question, Reply};
pub use query::{Query, QueryLimits, QueryRequest};
pub use server::ServerRecord;
pub use udp::UdpExchanger;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// DNS record type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    #[default]
    A,
    AAAA,
    CNAME,
    MX,
    TXT,
    NS,
    PTR,
    SOA,
    SRV,
    CAA,
    DS,
    DNSKEY,
    HTTPS,
    SVCB,
}

impl RecordType {
    /// Every record type a query may ask for
    pub fn all() -> Vec<RecordType> {
        vec![
            RecordType::A,
            RecordType::AAAA,
            RecordType::CNAME,
            RecordType::MX,
            RecordType::TXT,
            RecordType::NS,
            RecordType::PTR,
            RecordType::SOA,
            RecordType::SRV,
            RecordType::CAA,
            RecordType::DS,
            RecordType::DNSKEY,
            RecordType::HTTPS,
            RecordType::SVCB,
        ]
    }

    /// Convert record type to DNS type code
    pub fn to_type_code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::DS => 43,
            RecordType::DNSKEY => 48,
            RecordType::SVCB => 64,
            RecordType::HTTPS => 65,
            RecordType::CAA => 257,
        }
    }

    /// The mnemonic used in zone files and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::TXT => "TXT",
            RecordType::NS => "NS",
            RecordType::PTR => "PTR",
            RecordType::SOA => "SOA",
            RecordType::SRV => "SRV",
            RecordType::CAA => "CAA",
            RecordType::DS => "DS",
            RecordType::DNSKEY => "DNSKEY",
            RecordType::HTTPS => "HTTPS",
            RecordType::SVCB => "SVCB",
        }
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        RecordType::all()
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or(Error::InvalidRecordType(wanted))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for inventory handling and query planning
///
/// Failures of a single resolver never show up here; those are captured as
/// an [`ErrorKind`] inside that resolver's [`Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to use record type {0}")]
    InvalidRecordType(String),

    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("requested too many servers to query: {requested} exceeds the limit of {max}")]
    TooManyServers { requested: usize, max: usize },

    #[error("no servers matching country {0} were found")]
    NoMatch(String),

    #[error("insufficient servers to populate list: {available} of {requested}")]
    InsufficientServers { available: usize, requested: usize },

    #[error("invalid server record: {0}")]
    InvalidRecord(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error was caused by the caller's input rather than by the
    /// environment. Front ends map these to client-error responses.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidRecordType(_)
                | Error::InvalidDomain(_)
                | Error::TooManyServers { .. }
                | Error::NoMatch(_)
                | Error::InsufficientServers { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_defaults_to_a() {
        assert_eq!(RecordType::default(), RecordType::A);
    }

    #[test]
    fn test_record_type_codes() {
        assert_eq!(RecordType::A.to_type_code(), 1);
        assert_eq!(RecordType::AAAA.to_type_code(), 28);
        assert_eq!(RecordType::HTTPS.to_type_code(), 65);
        assert_eq!(RecordType::CAA.to_type_code(), 257);
    }

    #[test]
    fn test_record_type_parse_is_case_insensitive() {
        assert_eq!("A".parse::<RecordType>().unwrap(), RecordType::A);
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::AAAA);
        assert_eq!(" mx ".parse::<RecordType>().unwrap(), RecordType::MX);
    }

    #[test]
    fn test_record_type_parse_rejects_unknown() {
        let err = "foo".parse::<RecordType>().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("FOO"));
    }

    #[test]
    fn test_record_type_display_round_trips() {
        for t in RecordType::all() {
            assert_eq!(t.to_string().parse::<RecordType>().unwrap(), t);
        }
    }

    #[test]
    fn test_io_errors_are_not_validation() {
        let err = Error::Io {
            path: PathBuf::from("missing.yml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(!err.is_validation());
        assert!(err.to_string().starts_with("missing.yml"));
    }
}
