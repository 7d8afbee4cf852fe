//! Routing table client
//!
//! Encodes a batch as one polyline path (sources first, then destinations),
//! asks the table endpoint for distances only, and turns the answer into
//! door-to-door distances by adding both endpoints' snap distances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use geo::Coord;
use log::debug;
use reqwest::{Client, ClientBuilder, StatusCode, Url};
use serde::Deserialize;

use crate::core::error::{Error, Result};
use crate::core::retry::RetryPolicy;

/// Payload code of a successful table response
const SUCCESS_CODE: &str = "Ok";

/// Decimal precision of encoded polylines
const POLYLINE_PRECISION: u32 = 5;

/// Something that answers distance-table queries in geographic coordinates
#[allow(async_fn_in_trait)]
pub trait TableService {
    /// Door-to-door distance matrix, rows = sources, columns = destinations
    async fn table(&self, sources: &[Coord<f64>], destinations: &[Coord<f64>]) -> Result<DistanceMatrix>;

    /// HTTP requests issued so far, failed attempts included
    fn requests_issued(&self) -> u64 {
        0
    }
}

/// Row-major distance matrix in meters; unroutable cells are +infinity
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: usize,
    columns: usize,
    cells: Vec<f64>,
}

impl DistanceMatrix {
    pub fn new(rows: usize, columns: usize, cells: Vec<f64>) -> Result<Self> {
        if cells.len() != rows * columns {
            return Err(Error::MalformedResponse(format!(
                "expected {rows}x{columns} matrix, got {} cells",
                cells.len()
            )));
        }
        Ok(Self { rows, columns, cells })
    }

    /// Build from nested rows; `None` cells (no route) become +infinity
    pub fn from_rows(rows: Vec<Vec<Option<f64>>>, columns: usize) -> Result<Self> {
        let row_count = rows.len();
        let mut cells = Vec::with_capacity(row_count * columns);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != columns {
                return Err(Error::MalformedResponse(format!(
                    "row {i} has {} columns, expected {columns}",
                    row.len()
                )));
            }
            cells.extend(row.into_iter().map(|cell| cell.unwrap_or(f64::INFINITY)));
        }
        Self::new(row_count, columns, cells)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.cells[row * self.columns..(row + 1) * self.columns]
    }

    /// Add each destination's snap to its column and each source's snap to its row
    pub fn add_snap_distances(&mut self, source_snap: &[f64], destination_snap: &[f64]) -> Result<()> {
        if source_snap.len() != self.rows || destination_snap.len() != self.columns {
            return Err(Error::MalformedResponse(format!(
                "snap arrays {}x{} do not match a {}x{} matrix",
                source_snap.len(),
                destination_snap.len(),
                self.rows,
                self.columns
            )));
        }

        for (i, row) in self.cells.chunks_mut(self.columns.max(1)).enumerate().take(self.rows) {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell += destination_snap[j];
            }
            for cell in row.iter_mut() {
                *cell += source_snap[i];
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
    #[serde(default)]
    sources: Option<Vec<Waypoint>>,
    #[serde(default)]
    destinations: Option<Vec<Waypoint>>,
}

#[derive(Debug, Deserialize)]
struct Waypoint {
    #[serde(default)]
    distance: Option<f64>,
}

impl TableResponse {
    /// Validate shape against the request and apply snap distances
    fn into_matrix(self, sources: usize, destinations: usize) -> Result<DistanceMatrix> {
        let distances = self
            .distances
            .ok_or_else(|| Error::MalformedResponse("missing 'distances'".to_string()))?;
        if distances.len() != sources {
            return Err(Error::MalformedResponse(format!(
                "expected {sources} rows, got {}",
                distances.len()
            )));
        }

        let source_snap = snap_distances(self.sources, sources, "sources")?;
        let destination_snap = snap_distances(self.destinations, destinations, "destinations")?;

        let mut matrix = DistanceMatrix::from_rows(distances, destinations)?;
        matrix.add_snap_distances(&source_snap, &destination_snap)?;
        Ok(matrix)
    }
}

fn snap_distances(waypoints: Option<Vec<Waypoint>>, expected: usize, field: &str) -> Result<Vec<f64>> {
    let waypoints = waypoints.ok_or_else(|| Error::MalformedResponse(format!("missing '{field}'")))?;
    if waypoints.len() != expected {
        return Err(Error::MalformedResponse(format!(
            "expected {expected} {field}, got {}",
            waypoints.len()
        )));
    }
    Ok(waypoints.into_iter().map(|w| w.distance.unwrap_or(0.0)).collect())
}

/// Settings for the HTTP routing client
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Base URL of the routing service, e.g. `http://localhost:5000`
    pub base_url: String,
    /// Routing profile path segment
    pub profile: String,
    /// Per-request timeout; large tables take a while
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl RouterConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            profile: "driving".to_string(),
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Build the table request URL for a batch
pub fn table_url(
    base_url: &str,
    profile: &str,
    sources: &[Coord<f64>],
    destinations: &[Coord<f64>],
) -> Result<Url> {
    if sources.is_empty() || destinations.is_empty() {
        return Err(Error::InvalidInput(
            "table request needs at least one source and one destination".to_string(),
        ));
    }

    let encoded = polyline::encode_coordinates(
        sources.iter().chain(destinations.iter()).copied(),
        POLYLINE_PRECISION,
    )
    .map_err(|e| Error::InvalidInput(format!("cannot encode polyline: {e}")))?;

    let path = format!("polyline({encoded})");
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::InvalidInput(format!("invalid router URL '{base_url}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::InvalidInput(format!("router URL '{base_url}' cannot take a path")))?
        .pop_if_empty()
        .extend(["table", "v1", profile, path.as_str()]);

    let source_count = sources.len();
    let total = source_count + destinations.len();
    let join = |range: std::ops::Range<usize>| {
        range.map(|i| i.to_string()).collect::<Vec<_>>().join(";")
    };
    url.set_query(Some(&format!(
        "sources={}&destinations={}&generate_hints=false&annotations=distance",
        join(0..source_count),
        join(source_count..total)
    )));

    Ok(url)
}

/// reqwest-backed client for the routing table endpoint
pub struct RoutingClient {
    client: Client,
    config: RouterConfig,
    requests: AtomicU64,
}

impl RoutingClient {
    pub fn new(config: RouterConfig) -> Result<Self> {
        Url::parse(&config.base_url)
            .map_err(|e| Error::InvalidInput(format!("invalid router URL '{}': {e}", config.base_url)))?;

        let client = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("butterfly-reach/{}", env!("BUTTERFLY_VERSION")))
            .build()
            .map_err(|e| Error::NetworkError(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            requests: AtomicU64::new(0),
        })
    }

    /// One attempt: a failure here is classified for the retry loop
    async fn attempt(&self, url: &Url, sources: usize, destinations: usize) -> Result<DistanceMatrix> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: redact_path(url),
            });
        }

        let body = response.bytes().await?;
        let payload: TableResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::MalformedResponse(format!("invalid JSON: {e}")))?;

        if payload.code != SUCCESS_CODE {
            return Err(Error::RouterCode {
                code: payload.code,
                message: payload.message,
            });
        }

        payload.into_matrix(sources, destinations)
    }
}

impl TableService for RoutingClient {
    async fn table(&self, sources: &[Coord<f64>], destinations: &[Coord<f64>]) -> Result<DistanceMatrix> {
        let url = table_url(&self.config.base_url, &self.config.profile, sources, destinations)?;
        debug!(
            "Table request: {} sources x {} destinations",
            sources.len(),
            destinations.len()
        );

        self.config
            .retry
            .run(|_| self.attempt(&url, sources.len(), destinations.len()))
            .await
    }

    fn requests_issued(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// URL without the (potentially huge) encoded path, for error messages
fn redact_path(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    let text = shown.to_string();
    match text.find("polyline(") {
        Some(pos) => format!("{}polyline(...)", &text[..pos]),
        None => text,
    }
}
