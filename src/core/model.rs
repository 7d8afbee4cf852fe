//! Point entities shared by every stage of the pipeline
//!
//! Houses and stops keep their identity (position in the input dataset)
//! through reprojection, partitioning and batching.

use geo::Coord;

/// Identity of a house: its index in the input dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HouseId(pub usize);

/// Identity of a stop: its index in the input dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StopId(pub usize);

/// A point known in both the planar frame and geographic degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Metric equal-area coordinates (meters)
    pub planar: Coord<f64>,
    /// Longitude/latitude in degrees (x = lon, y = lat)
    pub geographic: Coord<f64>,
}

/// A transit stop
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: StopId,
    pub position: Position,
}

/// A building whose distance to the nearest stop is computed
#[derive(Debug, Clone, PartialEq)]
pub struct House {
    pub id: HouseId,
    pub position: Position,
    /// Best door-to-door distance seen so far, +infinity until a batch reaches it
    pub min_distance: f64,
}

impl House {
    pub fn new(id: HouseId, position: Position) -> Self {
        Self {
            id,
            position,
            min_distance: f64::INFINITY,
        }
    }

    /// Whether any routed batch reached this house
    pub fn is_reachable(&self) -> bool {
        self.min_distance.is_finite()
    }
}

impl Stop {
    pub fn new(id: StopId, position: Position) -> Self {
        Self { id, position }
    }
}
