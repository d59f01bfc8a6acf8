//! HTTP front end
//!
//! `GET /v1/query/{domain}` runs a query against a sample of the loaded
//! inventory and returns the per-server outcomes as JSON. Query string
//! parameters, short or long form:
//!
//! - `t` / `type`: record type, default `A`
//! - `c` / `country`: two-letter country code
//! - `q` / `servers`: how many servers to ask

use crate::aggregate::Outcome;
use crate::engine::ProbeEngine;
use crate::inventory::ServerInventory;
use crate::probe::Exchange;
use crate::query::{QueryLimits, QueryRequest};
use crate::Error;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub inventory: Arc<ServerInventory>,
    pub exchanger: Arc<dyn Exchange>,
    pub limits: QueryLimits,
    pub engine: ProbeEngine,
}

impl AppState {
    pub fn new(
        inventory: ServerInventory,
        exchanger: Arc<dyn Exchange>,
        limits: QueryLimits,
        engine: ProbeEngine,
    ) -> Self {
        Self {
            inventory: Arc::new(inventory),
            exchanger,
            limits,
            engine,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/query/{domain}", get(query_handler))
        .with_state(state)
}

/// Bind `addr` and serve the API until the process ends.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        servers = state.inventory.len(),
        "starting API server"
    );
    axum::serve(listener, router(state)).await
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    t: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    c: Option<String>,
    country: Option<String>,
    q: Option<String>,
    servers: Option<String>,
}

impl QueryParams {
    fn into_request(self, domain: String) -> QueryRequest {
        fn first(short: Option<String>, long: Option<String>) -> Option<String> {
            short.filter(|v| !v.is_empty()).or(long.filter(|v| !v.is_empty()))
        }

        // Counts that do not parse are treated as absent.
        let count = |v: Option<String>| v.and_then(|v| v.trim().parse::<usize>().ok()).unwrap_or(0);
        let servers = match count(self.q) {
            0 => count(self.servers),
            n => n,
        };

        QueryRequest {
            domain,
            record_type: first(self.t, self.record_type),
            country: first(self.c, self.country),
            servers: Some(servers),
        }
    }
}

async fn query_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Json<BTreeMap<String, Outcome>>, ApiError> {
    let request = params.into_request(domain);
    let (query, servers) = request.plan(&state.inventory, state.limits)?;

    // Dropped with the request, so a client hanging up stops new probes.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let result = query
        .execute_until_cancelled(&servers, &state.engine, &state.exchanger, cancel)
        .await;

    info!(
        domain = query.domain(),
        record_type = %query.record_type(),
        servers = result.total(),
        errors = result.summary.error_count,
        "answered query"
    );

    Ok(Json(result.detailed))
}

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, text) = if self.0.is_validation() {
            (StatusCode::BAD_REQUEST, "Invalid request.")
        } else {
            warn!(error = %self.0, "query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error.")
        };

        (status, Json(json!({ "status": text, "error": self.0.to_string() }))).into_response()
    }
}
