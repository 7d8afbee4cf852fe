//! # Butterfly-reach
//!
//! Road distance from every house to its nearest transit stop, computed in
//! spatially local batches against an OSRM-compatible table service.
//!
//! ## Library usage
//!
//! ```no_run
//! # async fn example() -> butterfly_reach::Result<()> {
//! use butterfly_reach::{ReachConfig, RouterConfig};
//!
//! let config = ReachConfig::new(
//!     "houses.geojson",
//!     "stops.geojson",
//!     "distances.geojson",
//!     RouterConfig::new("http://localhost:5000"),
//! );
//! let stats = butterfly_reach::run(&config).await?;
//! println!("{} houses reached", stats.houses_reached);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use log::info;

pub mod core;

pub use crate::core::aggregate::GlobalResult;
pub use crate::core::error::{Error, Result};
pub use crate::core::model::{House, HouseId, Position, Stop, StopId};
pub use crate::core::pipeline::{DebugTrace, ProgressCallback};
pub use crate::core::projection::{Crs, Reprojector};
pub use crate::core::retry::RetryPolicy;
pub use crate::core::{
    compute_distances, OverwriteBehavior, PointLayer, ReachOptions, ReachOutcome, RouterConfig,
    RoutingClient, RunStats, TableService,
};

use crate::core::dataset::{check_overwrite_permission, write_distances, write_partitions, write_trace_lines};

/// File names of the debug trace inside the debug directory
pub const PARTITIONS_FILE: &str = "partitions.geojson";
pub const DEBUG_LINES_FILE: &str = "debug_lines.geojson";

/// A complete file-to-file run
#[derive(Debug, Clone)]
pub struct ReachConfig {
    pub houses: PathBuf,
    pub stops: PathBuf,
    pub output: PathBuf,
    pub router: RouterConfig,
    pub options: ReachOptions,
    pub overwrite: OverwriteBehavior,
    /// Where the debug trace goes; `None` disables it
    pub debug_dir: Option<PathBuf>,
}

impl ReachConfig {
    pub fn new(
        houses: impl Into<PathBuf>,
        stops: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        router: RouterConfig,
    ) -> Self {
        Self {
            houses: houses.into(),
            stops: stops.into(),
            output: output.into(),
            router,
            options: ReachOptions::default(),
            overwrite: OverwriteBehavior::default(),
            debug_dir: None,
        }
    }
}

/// Read both layers, route every batch, write the distance layer
pub async fn run(config: &ReachConfig) -> Result<RunStats> {
    config.options.validate()?;
    check_overwrite_permission(&config.output, &config.overwrite)?;

    let reprojector = Reprojector::default();
    let house_layer = PointLayer::read(&config.houses)?;
    let stop_layer = PointLayer::read(&config.stops)?;
    let mut houses = house_layer.houses(&reprojector)?;
    let stops = stop_layer.stops(&reprojector)?;

    let client = RoutingClient::new(config.router.clone())?;
    let mut options = config.options.clone();
    options.trace = options.trace || config.debug_dir.is_some();

    let outcome = compute_distances(&client, &stops, &houses, &options).await?;
    outcome.distances.apply(&mut houses);
    write_distances(&config.output, &house_layer, &houses)?;
    info!("Wrote {} houses to {}", houses.len(), config.output.display());

    if let (Some(dir), Some(trace)) = (&config.debug_dir, &outcome.trace) {
        std::fs::create_dir_all(dir)?;
        write_partitions(&dir.join(PARTITIONS_FILE), &trace.partitions, &reprojector)?;
        write_trace_lines(&dir.join(DEBUG_LINES_FILE), &trace.lines)?;
        info!(
            "Debug trace written to {} ({} HTTP requests issued)",
            dir.display(),
            outcome.stats.requests
        );
    }

    Ok(outcome.stats)
}
