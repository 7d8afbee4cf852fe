//! Local matcher: houses within routing range of a group of stops
//!
//! Houses are indexed once in an R-tree; each query buffers a footprint
//! (a partition polygon or a slice of stops) by a radius and returns the
//! houses falling inside, ordered by identity.

use std::collections::BTreeSet;

use geo::{BoundingRect, Coord, EuclideanDistance, Point, Polygon};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};

use crate::core::model::{House, HouseId};

type IndexedHouse = GeomWithData<[f64; 2], HouseId>;

/// Geometry a match is buffered around
#[derive(Debug, Clone, Copy)]
pub enum Footprint<'a> {
    /// Whole partition polygon
    Region(&'a Polygon<f64>),
    /// Individual stop locations (planar)
    Points(&'a [Coord<f64>]),
}

/// Houses matched to a footprint, ordered by identity.
///
/// Position `i` in [`LocalMatch::houses`] is the column the house takes in a
/// routing batch built from this match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalMatch {
    pub houses: Vec<HouseId>,
}

impl LocalMatch {
    pub fn is_empty(&self) -> bool {
        self.houses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.houses.len()
    }
}

/// Spatial index over house locations in the planar frame
pub struct HouseIndex {
    tree: RTree<IndexedHouse>,
}

impl HouseIndex {
    pub fn new(houses: &[House]) -> Self {
        let points = houses
            .iter()
            .map(|house| {
                let c = house.position.planar;
                GeomWithData::new([c.x, c.y], house.id)
            })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// Index restricted to a subset of houses (a partition's candidates)
    pub fn subset(houses: &[House], ids: &[HouseId]) -> Self {
        let points = ids
            .iter()
            .filter_map(|id| houses.get(id.0))
            .map(|house| {
                let c = house.position.planar;
                GeomWithData::new([c.x, c.y], house.id)
            })
            .collect();
        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// Houses within `radius` of the footprint. An empty result is not an error.
    pub fn match_within(&self, footprint: Footprint<'_>, radius: f64) -> LocalMatch {
        let radius = radius.max(0.0);
        let mut found = BTreeSet::new();

        match footprint {
            Footprint::Points(points) => {
                let radius_2 = radius * radius;
                for c in points {
                    for hit in self.tree.locate_within_distance([c.x, c.y], radius_2) {
                        found.insert(hit.data);
                    }
                }
            }
            Footprint::Region(polygon) => {
                let Some(rect) = polygon.bounding_rect() else {
                    return LocalMatch::default();
                };
                let envelope = AABB::from_corners(
                    [rect.min().x - radius, rect.min().y - radius],
                    [rect.max().x + radius, rect.max().y + radius],
                );
                for hit in self.tree.locate_in_envelope_intersecting(&envelope) {
                    let [x, y] = *hit.geom();
                    if Point::new(x, y).euclidean_distance(polygon) <= radius {
                        found.insert(hit.data);
                    }
                }
            }
        }

        LocalMatch {
            houses: found.into_iter().collect(),
        }
    }
}
