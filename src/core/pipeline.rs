//! Batch pipeline: partitions → local matches → batches → routing → merge
//!
//! Strictly sequential: one partition, one slice, one request at a time.
//! The global result is only touched after a batch has been fully routed.

use std::sync::Arc;

use geo::{Coord, Polygon};
use log::{debug, info};

use crate::core::aggregate::{pair_distances, GlobalResult, PairDistance};
use crate::core::error::{Error, Result};
use crate::core::matcher::HouseIndex;
use crate::core::model::{House, Stop};
use crate::core::partition::{inscribed_radius, partition_stops, QUARTER_SEGMENTS};
use crate::core::router::TableService;
use crate::core::scheduler::{plan_partition, MatchRadii, MAX_TABLE_SIZE};

/// Default matching radius in meters
pub const DEFAULT_MAX_DIST: f64 = 500.0;

/// Default divisor turning `max_dist` into the partition smoothing radius
pub const DEFAULT_PARTITION_DIVISOR: f64 = 3.0;

/// Progress callback: (stops processed, total stops)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Options for a distance computation
#[derive(Clone)]
pub struct ReachOptions {
    /// Routing range around each stop (meters)
    pub max_dist: f64,

    /// Partition disks use `max_dist / partition_divisor`
    pub partition_divisor: f64,

    /// Maximum sources × destinations per request
    pub max_table_size: usize,

    /// Keep partitions and evaluated pairs for inspection
    pub trace: bool,

    /// Optional progress callback
    pub progress: Option<ProgressCallback>,
}

impl Default for ReachOptions {
    fn default() -> Self {
        Self {
            max_dist: DEFAULT_MAX_DIST,
            partition_divisor: DEFAULT_PARTITION_DIVISOR,
            max_table_size: MAX_TABLE_SIZE,
            trace: false,
            progress: None,
        }
    }
}

impl std::fmt::Debug for ReachOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachOptions")
            .field("max_dist", &self.max_dist)
            .field("partition_divisor", &self.partition_divisor)
            .field("max_table_size", &self.max_table_size)
            .field("trace", &self.trace)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl ReachOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_dist.is_finite() && self.max_dist > 0.0) {
            return Err(Error::InvalidInput(format!(
                "max_dist must be a positive distance, got {}",
                self.max_dist
            )));
        }
        if !(self.partition_divisor.is_finite() && self.partition_divisor > 1.0) {
            return Err(Error::InvalidInput(format!(
                "partition divisor must be greater than 1, got {}",
                self.partition_divisor
            )));
        }
        if self.max_table_size == 0 {
            return Err(Error::InvalidInput("max table size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Radius of the disks merged into partitions
    pub fn smoothing_radius(&self) -> f64 {
        self.max_dist / self.partition_divisor
    }

    /// Partition-level radius is the smallest one that still reaches every
    /// house within `max_dist` of a stop: the disk polygon already covers
    /// its inscribed circle around the stop.
    pub fn radii(&self) -> MatchRadii {
        let covered = inscribed_radius(self.smoothing_radius(), QUARTER_SEGMENTS);
        MatchRadii {
            partition: (self.max_dist - covered).max(0.0),
            slice: self.max_dist,
        }
    }
}

/// Counters of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub partitions: usize,
    pub slices: usize,
    pub skipped_slices: usize,
    pub batches: usize,
    pub requests: u64,
    pub houses_reached: usize,
}

/// A partition polygon (planar) with its stop count
#[derive(Debug, Clone)]
pub struct TracePartition {
    pub index: usize,
    pub polygon: Polygon<f64>,
    pub stops: usize,
}

/// One evaluated stop → house pair with geographic endpoints
#[derive(Debug, Clone)]
pub struct TraceLine {
    pub pair: PairDistance,
    pub from: Coord<f64>,
    pub to: Coord<f64>,
}

/// Intermediate geometry kept when tracing is on
#[derive(Debug, Clone, Default)]
pub struct DebugTrace {
    pub partitions: Vec<TracePartition>,
    pub lines: Vec<TraceLine>,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct ReachOutcome {
    pub distances: GlobalResult,
    pub stats: RunStats,
    pub trace: Option<DebugTrace>,
}

/// Identity must equal position in the input slices
fn check_identities(stops: &[Stop], houses: &[House]) -> Result<()> {
    if let Some((i, stop)) = stops.iter().enumerate().find(|(i, s)| s.id.0 != *i) {
        return Err(Error::InvalidInput(format!(
            "stop at position {i} carries identity {}",
            stop.id.0
        )));
    }
    if let Some((i, house)) = houses.iter().enumerate().find(|(i, h)| h.id.0 != *i) {
        return Err(Error::InvalidInput(format!(
            "house at position {i} carries identity {}",
            house.id.0
        )));
    }
    Ok(())
}

/// Compute the minimum routed distance from every house to any stop in range
pub async fn compute_distances<S: TableService>(
    service: &S,
    stops: &[Stop],
    houses: &[House],
    options: &ReachOptions,
) -> Result<ReachOutcome> {
    options.validate()?;
    check_identities(stops, houses)?;

    let total_stops = stops.len() as u64;
    let mut processed = 0u64;
    let report = |processed: u64| {
        if let Some(progress) = &options.progress {
            progress(processed, total_stops);
        }
    };

    let partitions = partition_stops(stops, options.smoothing_radius())?;
    let index = HouseIndex::new(houses);
    let radii = options.radii();

    info!(
        "Routing {} houses from {} stops in {} partitions (max_dist {}m)",
        houses.len(),
        stops.len(),
        partitions.len(),
        options.max_dist
    );

    let mut global = GlobalResult::new();
    let mut stats = RunStats {
        partitions: partitions.len(),
        ..Default::default()
    };
    let mut trace = options.trace.then(DebugTrace::default);

    if let Some(trace) = trace.as_mut() {
        trace.partitions = partitions
            .iter()
            .map(|p| TracePartition {
                index: p.index,
                polygon: p.polygon.clone(),
                stops: p.stops.len(),
            })
            .collect();
    }

    report(processed);

    for partition in &partitions {
        let plan = plan_partition(partition, stops, houses, &index, radii, options.max_table_size);

        if plan.slices.is_empty() {
            processed += partition.stops.len() as u64;
            report(processed);
            continue;
        }

        for slice in &plan.slices {
            stats.slices += 1;
            if slice.is_skipped() {
                stats.skipped_slices += 1;
            }

            for batch in &slice.batches {
                let sources: Vec<Coord<f64>> =
                    batch.stops.iter().map(|id| stops[id.0].position.geographic).collect();
                let destinations: Vec<Coord<f64>> =
                    batch.houses.iter().map(|id| houses[id.0].position.geographic).collect();

                let matrix = service.table(&sources, &destinations).await?;
                let improved = global.merge_batch(batch, &matrix)?;
                stats.batches += 1;

                debug!(
                    "Batch {}: {} stops x {} houses, {improved} houses improved",
                    stats.batches,
                    batch.stops.len(),
                    batch.houses.len()
                );

                if let Some(trace) = trace.as_mut() {
                    trace.lines.extend(pair_distances(batch, &matrix)?.into_iter().map(|pair| TraceLine {
                        pair,
                        from: stops[pair.stop.0].position.geographic,
                        to: houses[pair.house.0].position.geographic,
                    }));
                }
            }

            processed += slice.stops.len() as u64;
            report(processed);
        }
    }

    stats.requests = service.requests_issued();
    stats.houses_reached = global.reached();

    info!(
        "Done: {} batches over {} slices ({} skipped), {} requests, {}/{} houses reached",
        stats.batches,
        stats.slices,
        stats.skipped_slices,
        stats.requests,
        stats.houses_reached,
        houses.len()
    );

    Ok(ReachOutcome {
        distances: global,
        stats,
        trace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{HouseId, Position, StopId};
    use crate::core::projection::Reprojector;
    use crate::core::router::DistanceMatrix;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Somewhere between the standard parallels, in planar meters
    const ORIGIN: Coord<f64> = Coord { x: 18_500_000.0, y: 5_900_000.0 };

    /// Straight-line router working in the planar frame, with a fixed snap distance
    struct PlanarRouter {
        reprojector: Reprojector,
        snap: f64,
        calls: AtomicU64,
        shapes: RefCell<Vec<(usize, usize)>>,
        fail_with: Option<fn() -> Error>,
    }

    impl PlanarRouter {
        fn new(snap: f64) -> Self {
            Self {
                reprojector: Reprojector::default(),
                snap,
                calls: AtomicU64::new(0),
                shapes: RefCell::new(Vec::new()),
                fail_with: None,
            }
        }
    }

    impl TableService for PlanarRouter {
        async fn table(&self, sources: &[Coord<f64>], destinations: &[Coord<f64>]) -> Result<DistanceMatrix> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.shapes.borrow_mut().push((sources.len(), destinations.len()));
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }

            let mut cells = Vec::with_capacity(sources.len() * destinations.len());
            for s in sources {
                let a = self.reprojector.to_planar(*s);
                for d in destinations {
                    let b = self.reprojector.to_planar(*d);
                    cells.push(((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt());
                }
            }
            let mut matrix = DistanceMatrix::new(sources.len(), destinations.len(), cells)?;
            matrix.add_snap_distances(&vec![self.snap; sources.len()], &vec![self.snap; destinations.len()])?;
            Ok(matrix)
        }

        fn requests_issued(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn position(dx: f64, dy: f64) -> Position {
        let reprojector = Reprojector::default();
        let planar = Coord { x: ORIGIN.x + dx, y: ORIGIN.y + dy };
        Position { planar, geographic: reprojector.to_geographic(planar) }
    }

    fn stops_at(points: &[(f64, f64)]) -> Vec<Stop> {
        points.iter().enumerate().map(|(i, &(x, y))| Stop::new(StopId(i), position(x, y))).collect()
    }

    fn houses_at(points: &[(f64, f64)]) -> Vec<House> {
        points.iter().enumerate().map(|(i, &(x, y))| House::new(HouseId(i), position(x, y))).collect()
    }

    #[tokio::test]
    async fn test_two_stops_three_houses_scenario() {
        let stops = stops_at(&[(0.0, 0.0), (0.0, 100.0)]);
        let houses = houses_at(&[(0.0, 10.0), (0.0, 90.0), (1_000.0, 1_000.0)]);
        let router = PlanarRouter::new(1.5);
        let options = ReachOptions { max_dist: 50.0, ..Default::default() };

        let outcome = compute_distances(&router, &stops, &houses, &options).await.unwrap();

        assert!((outcome.distances.distance(HouseId(0)) - 13.0).abs() < 1e-6);
        assert!((outcome.distances.distance(HouseId(1)) - 13.0).abs() < 1e-6);
        assert!(outcome.distances.distance(HouseId(2)).is_infinite());

        assert_eq!(outcome.stats.partitions, 2);
        assert_eq!(outcome.stats.batches, 2);
        assert_eq!(outcome.stats.requests, 2);
        assert_eq!(outcome.stats.houses_reached, 2);
        // Each stop only ever saw its own house
        assert_eq!(*router.shapes.borrow(), vec![(1, 1), (1, 1)]);
    }

    #[tokio::test]
    async fn test_matches_brute_force_within_range() {
        // Deterministic scatter: stops in loose clusters, houses everywhere
        let mut seed = 0x2545_f491_u64;
        let mut next = || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            ((seed >> 33) as f64) / ((1u64 << 31) as f64)
        };

        let stop_points: Vec<(f64, f64)> = (0..60).map(|_| (next() * 3_000.0, next() * 3_000.0)).collect();
        let house_points: Vec<(f64, f64)> = (0..500).map(|_| (next() * 3_000.0, next() * 3_000.0)).collect();
        let stops = stops_at(&stop_points);
        let houses = houses_at(&house_points);

        let router = PlanarRouter::new(0.0);
        let options = ReachOptions {
            max_dist: 300.0,
            max_table_size: 200,
            ..Default::default()
        };
        let outcome = compute_distances(&router, &stops, &houses, &options).await.unwrap();

        for (i, h) in house_points.iter().enumerate() {
            let best_in_range = stop_points
                .iter()
                .map(|s| ((s.0 - h.0).powi(2) + (s.1 - h.1).powi(2)).sqrt())
                .filter(|d| *d <= options.max_dist)
                .fold(f64::INFINITY, f64::min);
            let got = outcome.distances.distance(HouseId(i));

            if best_in_range.is_finite() {
                assert!((got - best_in_range).abs() < 1e-4, "house {i}: {got} vs {best_in_range}");
            } else {
                assert!(got > options.max_dist, "house {i} out of range but got {got}");
            }
        }

        for (sources, destinations) in router.shapes.borrow().iter() {
            assert!(sources * destinations <= options.max_table_size);
        }
    }

    #[tokio::test]
    async fn test_routing_failure_aborts_run() {
        let stops = stops_at(&[(0.0, 0.0)]);
        let houses = houses_at(&[(0.0, 10.0)]);
        let mut router = PlanarRouter::new(0.0);
        fn no_segment() -> Error {
            Error::RouterCode { code: "NoSegment".to_string(), message: None }
        }
        router.fail_with = Some(no_segment as fn() -> Error);

        let result = compute_distances(&router, &stops, &houses, &ReachOptions::default()).await;
        assert!(matches!(result, Err(Error::RouterCode { .. })));
    }

    #[tokio::test]
    async fn test_progress_reaches_total_even_when_skipping() {
        let stops = stops_at(&[(0.0, 0.0), (5_000.0, 0.0), (5_000.0, 30.0)]);
        let houses = houses_at(&[(0.0, 20.0)]);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let options = ReachOptions {
            max_dist: 100.0,
            progress: Some(Arc::new(move |done, total| sink.lock().unwrap().push((done, total)))),
            ..Default::default()
        };
        let router = PlanarRouter::new(0.0);
        compute_distances(&router, &stops, &houses, &options).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&(0, 3)));
        assert_eq!(seen.last(), Some(&(3, 3)));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_trace_records_partitions_and_pairs() {
        let stops = stops_at(&[(0.0, 0.0), (0.0, 100.0)]);
        let houses = houses_at(&[(0.0, 10.0), (0.0, 90.0)]);
        let router = PlanarRouter::new(0.0);
        let options = ReachOptions { max_dist: 50.0, trace: true, ..Default::default() };

        let outcome = compute_distances(&router, &stops, &houses, &options).await.unwrap();
        let trace = outcome.trace.unwrap();

        assert_eq!(trace.partitions.len(), 2);
        assert_eq!(trace.lines.len(), 2);
        let line = trace.lines.iter().find(|l| l.pair.house == HouseId(1)).unwrap();
        assert_eq!(line.pair.stop, StopId(1));
        assert_eq!(line.to, houses[1].position.geographic);
    }

    #[tokio::test]
    async fn test_no_stops_leaves_everything_unreachable() {
        let houses = houses_at(&[(0.0, 10.0)]);
        let router = PlanarRouter::new(0.0);
        let outcome = compute_distances(&router, &[], &houses, &ReachOptions::default()).await.unwrap();
        assert!(outcome.distances.distance(HouseId(0)).is_infinite());
        assert_eq!(outcome.stats.requests, 0);
    }

    #[test]
    fn test_radii_cover_full_range() {
        let options = ReachOptions::default();
        let radii = options.radii();
        let covered = inscribed_radius(options.smoothing_radius(), QUARTER_SEGMENTS);

        assert_eq!(radii.slice, 500.0);
        assert!(radii.partition < radii.slice);
        assert!((radii.partition + covered - options.max_dist).abs() < 1e-9);
    }

    #[test]
    fn test_options_validation() {
        assert!(ReachOptions::default().validate().is_ok());
        assert!(ReachOptions { max_dist: -1.0, ..Default::default() }.validate().is_err());
        assert!(ReachOptions { partition_divisor: 1.0, ..Default::default() }.validate().is_err());
        assert!(ReachOptions { max_table_size: 0, ..Default::default() }.validate().is_err());
    }

    #[tokio::test]
    async fn test_mismatched_identity_is_rejected() {
        let mut stops = stops_at(&[(0.0, 0.0)]);
        stops[0].id = StopId(3);
        let router = PlanarRouter::new(0.0);
        let result = compute_distances(&router, &stops, &[], &ReachOptions::default()).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
