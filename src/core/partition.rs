//! Partitioner: merges overlapping stop disks into disjoint regions
//!
//! Every stop is buffered by a smoothing radius, the disks are unioned, and
//! each connected component of the union becomes one partition. Stops are
//! then attached to partitions through an R-tree over partition bounding
//! boxes, never by scanning every polygon.

use geo::{BooleanOps, BoundingRect, Coord, EuclideanDistance, Intersects, LineString, MultiPolygon, Point, Polygon};
use log::debug;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;

use crate::core::error::{Error, Result};
use crate::core::model::{Stop, StopId};

/// Segments per quarter circle when approximating a disk
pub const QUARTER_SEGMENTS: usize = 4;

/// A connected coverage region and the stops it owns
#[derive(Debug, Clone)]
pub struct Partition {
    pub index: usize,
    pub polygon: Polygon<f64>,
    /// Stops in input order
    pub stops: Vec<StopId>,
}

/// Polygon approximating a disk; vertices lie on the circle
pub fn disk(center: Coord<f64>, radius: f64, quarter_segments: usize) -> Polygon<f64> {
    let segments = 4 * quarter_segments.max(1);
    let step = std::f64::consts::TAU / segments as f64;

    let mut ring: Vec<Coord<f64>> = (0..segments)
        .map(|i| {
            let angle = step * i as f64;
            Coord {
                x: center.x + radius * angle.cos(),
                y: center.y + radius * angle.sin(),
            }
        })
        .collect();
    ring.push(ring[0]);

    Polygon::new(LineString::new(ring), vec![])
}

/// Radius of the largest circle inside a disk polygon built by [`disk`]
pub fn inscribed_radius(radius: f64, quarter_segments: usize) -> f64 {
    let segments = 4 * quarter_segments.max(1);
    radius * (std::f64::consts::PI / segments as f64).cos()
}

/// Union all polygons by merging neighbours pairwise until one multipolygon remains
pub fn cascaded_union(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let mut layer: Vec<MultiPolygon<f64>> = polygons
        .into_iter()
        .map(|p| MultiPolygon::new(vec![p]))
        .collect();

    if layer.is_empty() {
        return MultiPolygon::new(vec![]);
    }

    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        let mut iter = layer.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => next.push(left.union(&right)),
                None => next.push(left),
            }
        }
        layer = next;
    }

    layer.pop().unwrap_or_else(|| MultiPolygon::new(vec![]))
}

/// Build partitions from stops.
///
/// `smoothing_radius` is the disk radius used for merging (a fraction of
/// the matching radius). Stops are assigned to the partition polygon they
/// intersect; every stop ends up in exactly one partition.
pub fn partition_stops(stops: &[Stop], smoothing_radius: f64) -> Result<Vec<Partition>> {
    if !(smoothing_radius.is_finite() && smoothing_radius > 0.0) {
        return Err(Error::InvalidInput(format!(
            "smoothing radius must be positive, got {smoothing_radius}"
        )));
    }
    if stops.is_empty() {
        return Ok(Vec::new());
    }

    let disks = stops
        .iter()
        .map(|stop| disk(stop.position.planar, smoothing_radius, QUARTER_SEGMENTS))
        .collect();
    let union = cascaded_union(disks);

    let mut partitions: Vec<Partition> = union
        .0
        .into_iter()
        .enumerate()
        .map(|(index, polygon)| Partition {
            index,
            polygon,
            stops: Vec::new(),
        })
        .collect();

    if partitions.is_empty() {
        return Err(Error::GeometryError(
            "union of stop disks produced no polygons".to_string(),
        ));
    }

    let tree = partition_tree(&partitions)?;

    for stop in stops {
        let owner = locate_partition(&tree, &partitions, stop.position.planar);
        partitions[owner].stops.push(stop.id);
    }

    // Components that picked up no stop can only come from degenerate slivers
    partitions.retain(|p| !p.stops.is_empty());
    for (index, partition) in partitions.iter_mut().enumerate() {
        partition.index = index;
    }

    debug!(
        "Partitioned {} stops into {} regions (smoothing radius {smoothing_radius:.1}m)",
        stops.len(),
        partitions.len()
    );

    Ok(partitions)
}

type PartitionEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn partition_tree(partitions: &[Partition]) -> Result<RTree<PartitionEnvelope>> {
    let mut envelopes = Vec::with_capacity(partitions.len());
    for (i, partition) in partitions.iter().enumerate() {
        let rect = partition.polygon.bounding_rect().ok_or_else(|| {
            Error::GeometryError(format!("partition {i} has an empty exterior ring"))
        })?;
        envelopes.push(GeomWithData::new(
            Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            i,
        ));
    }
    Ok(RTree::bulk_load(envelopes))
}

/// Index of the partition owning a point: first polygon intersecting it,
/// else the nearest polygon among the closest envelopes
fn locate_partition(
    tree: &RTree<PartitionEnvelope>,
    partitions: &[Partition],
    location: Coord<f64>,
) -> usize {
    let point = Point::from(location);
    let query = [location.x, location.y];

    if let Some(hit) = tree
        .locate_all_at_point(&query)
        .find(|candidate| partitions[candidate.data].polygon.intersects(&point))
    {
        return hit.data;
    }

    tree.nearest_neighbor_iter(&query)
        .take(8)
        .map(|candidate| {
            let distance = point.euclidean_distance(&partitions[candidate.data].polygon);
            (candidate.data, distance)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
        .unwrap_or(0)
}
