//! Result aggregator: folds batch matrices into the global minimum per house
//!
//! The merge takes a per-house minimum, so it is commutative and
//! idempotent: batches may be replayed or reordered without changing the
//! final mapping.

use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::core::model::{House, HouseId, StopId};
use crate::core::router::DistanceMatrix;
use crate::core::scheduler::Batch;

/// Best distance of one house within one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceRecord {
    pub house: HouseId,
    pub distance: f64,
}

/// One evaluated (stop, house) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairDistance {
    pub stop: StopId,
    pub house: HouseId,
    pub distance: f64,
}

/// Reshape a batch matrix into identity-keyed triples
pub fn pair_distances(batch: &Batch, matrix: &DistanceMatrix) -> Result<Vec<PairDistance>> {
    if matrix.rows() != batch.stops.len() || matrix.columns() != batch.houses.len() {
        return Err(Error::MalformedResponse(format!(
            "matrix is {}x{} but batch has {} stops and {} houses",
            matrix.rows(),
            matrix.columns(),
            batch.stops.len(),
            batch.houses.len()
        )));
    }

    let mut pairs = Vec::with_capacity(batch.cells());
    for (row, stop) in batch.stops.iter().enumerate() {
        for (house, distance) in batch.houses.iter().zip(matrix.row(row)) {
            pairs.push(PairDistance {
                stop: *stop,
                house: *house,
                distance: *distance,
            });
        }
    }
    Ok(pairs)
}

/// Minimum distance per house across the stops of one batch
pub fn nearest_per_house(pairs: &[PairDistance]) -> Vec<DistanceRecord> {
    let mut best: HashMap<HouseId, f64> = HashMap::new();
    for pair in pairs {
        best.entry(pair.house)
            .and_modify(|d| *d = d.min(pair.distance))
            .or_insert(pair.distance);
    }

    let mut records: Vec<DistanceRecord> = best
        .into_iter()
        .map(|(house, distance)| DistanceRecord { house, distance })
        .collect();
    records.sort_by_key(|r| r.house);
    records
}

/// Running minimum distance per house over every batch seen so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalResult {
    distances: HashMap<HouseId, f64>,
}

impl GlobalResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge batch-local minima; returns how many houses improved
    pub fn merge(&mut self, records: &[DistanceRecord]) -> usize {
        let mut improved = 0;
        for record in records {
            let current = self.distances.entry(record.house).or_insert(f64::INFINITY);
            if record.distance < *current {
                *current = record.distance;
                improved += 1;
            }
        }
        improved
    }

    /// Reshape, reduce and merge one routed batch
    pub fn merge_batch(&mut self, batch: &Batch, matrix: &DistanceMatrix) -> Result<usize> {
        let pairs = pair_distances(batch, matrix)?;
        Ok(self.merge(&nearest_per_house(&pairs)))
    }

    /// Recorded distance, +infinity for houses no batch reached
    pub fn distance(&self, house: HouseId) -> f64 {
        self.distances.get(&house).copied().unwrap_or(f64::INFINITY)
    }

    /// Houses with a finite distance
    pub fn reached(&self) -> usize {
        self.distances.values().filter(|d| d.is_finite()).count()
    }

    /// Write the recorded minimum into each house
    pub fn apply(&self, houses: &mut [House]) {
        for house in houses.iter_mut() {
            house.min_distance = house.min_distance.min(self.distance(house.id));
        }
    }
}
