//! Batch scheduler: cuts a partition into routing requests under the
//! table-size ceiling
//!
//! Matching happens at two levels. The partition polygon, buffered by the
//! exploratory radius, yields the candidate houses and fixes how many stops
//! fit in one request. Each slice of stops is then re-matched at the full
//! radius against those candidates, so a request only carries the houses
//! that slice can actually reach.

use geo::Coord;
use log::debug;

use crate::core::matcher::{Footprint, HouseIndex, LocalMatch};
use crate::core::model::{House, HouseId, Stop, StopId};
use crate::core::partition::Partition;

/// Matrix cell ceiling of the routing table API
pub const MAX_TABLE_SIZE: usize = 100_000;

/// One routing request: sources (stops) and destinations (houses).
///
/// Row `i` of the response belongs to `stops[i]`, column `j` to `houses[j]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub stops: Vec<StopId>,
    pub houses: Vec<HouseId>,
}

impl Batch {
    /// Number of matrix cells this batch asks for
    pub fn cells(&self) -> usize {
        self.stops.len() * self.houses.len()
    }
}

/// A consecutive run of a partition's stops
#[derive(Debug, Clone, PartialEq)]
pub struct SlicePlan {
    pub stops: Vec<StopId>,
    /// Empty when no house is in range of the slice
    pub batches: Vec<Batch>,
}

impl SlicePlan {
    pub fn is_skipped(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Everything needed to route one partition
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionPlan {
    pub partition: usize,
    /// Houses matched at partition level
    pub candidates: LocalMatch,
    pub stops_per_batch: usize,
    /// Empty when the partition matched no house
    pub slices: Vec<SlicePlan>,
}

/// Radii used at the two matching levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchRadii {
    /// Buffer around the partition polygon
    pub partition: f64,
    /// Buffer around each stop of a slice
    pub slice: f64,
}

/// Stops per request so that stops × houses stays under the ceiling; at least one
pub fn max_stops_per_batch(max_table_size: usize, matched_houses: usize) -> usize {
    (max_table_size / matched_houses.max(1)).max(1)
}

/// Split one slice's houses into destination chunks small enough for the ceiling
pub fn batches_for_slice(stops: &[StopId], houses: &LocalMatch, max_table_size: usize) -> Vec<Batch> {
    if stops.is_empty() || houses.is_empty() {
        return Vec::new();
    }

    let houses_per_batch = (max_table_size / stops.len()).max(1);
    houses
        .houses
        .chunks(houses_per_batch)
        .map(|chunk| Batch {
            stops: stops.to_vec(),
            houses: chunk.to_vec(),
        })
        .collect()
}

/// Plan the routing requests of one partition
pub fn plan_partition(
    partition: &Partition,
    stops: &[Stop],
    houses: &[House],
    index: &HouseIndex,
    radii: MatchRadii,
    max_table_size: usize,
) -> PartitionPlan {
    let candidates = index.match_within(Footprint::Region(&partition.polygon), radii.partition);
    let stops_per_batch = max_stops_per_batch(max_table_size, candidates.len());

    if candidates.is_empty() {
        debug!("Partition {} matched no houses, skipping", partition.index);
        return PartitionPlan {
            partition: partition.index,
            candidates,
            stops_per_batch,
            slices: Vec::new(),
        };
    }

    let local_index = HouseIndex::subset(houses, &candidates.houses);

    let slices: Vec<SlicePlan> = partition
        .stops
        .chunks(stops_per_batch)
        .map(|slice| {
            let locations: Vec<Coord<f64>> = slice
                .iter()
                .filter_map(|id| stops.get(id.0))
                .map(|stop| stop.position.planar)
                .collect();
            let reachable = local_index.match_within(Footprint::Points(&locations), radii.slice);
            SlicePlan {
                stops: slice.to_vec(),
                batches: batches_for_slice(slice, &reachable, max_table_size),
            }
        })
        .collect();

    debug!(
        "Partition {}: {} stops, {} candidate houses, {} slices of up to {} stops",
        partition.index,
        partition.stops.len(),
        candidates.len(),
        slices.len(),
        stops_per_batch
    );

    PartitionPlan {
        partition: partition.index,
        candidates,
        stops_per_batch,
        slices,
    }
}
