//! Public nameserver catalogs, such as the one published by public-dns.info.
//!
//! The catalog is a CSV file with one row per nameserver. Only IPv4 servers
//! whose reported reliability meets [`RELIABILITY_THRESHOLD`] are kept.

use crate::inventory::ServerInventory;
use crate::server::ServerRecord;
use crate::{Error, Result};
use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Minimum reliability score, from 0.0 to 1.0, for a catalog row to be kept.
pub const RELIABILITY_THRESHOLD: f64 = 0.97;

/// The columns of a catalog row we care about. Others are ignored.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    ip: String,
    #[serde(default)]
    name: String,
    /// Two-letter ISO 3166-1 alpha-2 code
    #[serde(rename = "country_id", default)]
    country: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    reliability: Option<f64>,
}

impl CatalogRow {
    fn into_record(self) -> Option<ServerRecord> {
        // IPv6 resolvers are not probed.
        if self.ip.trim().parse::<Ipv4Addr>().is_err() {
            return None;
        }
        match self.reliability {
            Some(score) if score >= RELIABILITY_THRESHOLD => {
                Some(ServerRecord::new(self.ip, self.country, self.name))
            }
            _ => None,
        }
    }
}

/// Download a catalog and turn it into an inventory.
pub async fn fetch(url: &str) -> Result<ServerInventory> {
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    info!(url, "fetching nameserver catalog");

    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    parse(&body)
}

/// Parse catalog CSV text.
///
/// The published file is sometimes cut off mid-row; a final row with fewer
/// fields than the header is discarded. Rows without an IPv4 address or
/// below the reliability threshold are dropped silently.
pub fn parse(data: &str) -> Result<ServerInventory> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows: Vec<StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;

    if rows.last().map_or(false, |last| last.len() < headers.len()) {
        debug!("discarding truncated final catalog row");
        rows.pop();
    }

    let mut servers = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for (index, row) in rows.iter().enumerate() {
        if row.len() != headers.len() {
            return Err(Error::InvalidRecord(format!(
                "catalog row {} has {} fields, expected {}",
                index + 2,
                row.len(),
                headers.len()
            )));
        }

        let parsed: CatalogRow = row.deserialize(Some(&headers))?;
        match parsed.into_record() {
            Some(server) => servers.push(server),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!(dropped, "dropped unreliable or non-IPv4 catalog rows");
    }
    info!(kept = servers.len(), dropped, "parsed nameserver catalog");
    Ok(ServerInventory::new(servers))
}
