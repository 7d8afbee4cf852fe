//! GeoJSON point layers in, distance layer out
//!
//! Only what the pipeline needs: feature collections of points or building
//! footprints, an optional legacy `crs` member, and property passthrough.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use geo::{Centroid, Coord, LineString, MapCoords, MultiPolygon, Polygon};
use log::debug;
use serde_json::{json, Map, Value};

use crate::core::error::{Error, Result};
use crate::core::model::{House, HouseId, Position, Stop, StopId};
use crate::core::pipeline::{TraceLine, TracePartition};
use crate::core::projection::{Crs, Reprojector};

/// Behavior when the output file already exists
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OverwriteBehavior {
    /// Ask on the terminal
    #[default]
    Prompt,
    /// Replace without asking
    Force,
    /// Fail if the file exists
    NeverOverwrite,
}

/// Check if the output file exists and apply the overwrite behavior
pub fn check_overwrite_permission(path: &Path, behavior: &OverwriteBehavior) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }

    let shown = path.display();
    match behavior {
        OverwriteBehavior::Force => {
            eprintln!("⚠️  Overwriting existing file: {shown}");
            Ok(true)
        }
        OverwriteBehavior::NeverOverwrite => Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("File already exists: {shown} (use --force to overwrite)"),
        ))),
        OverwriteBehavior::Prompt => {
            eprintln!("⚠️  File already exists: {shown}");
            eprint!("Overwrite? [y/N]: ");
            std::io::stderr().flush()?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            match input.trim().to_lowercase().as_str() {
                "y" | "yes" => Ok(true),
                _ => Err(Error::IoError(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "Cancelled by user",
                ))),
            }
        }
    }
}

/// Geometry of one input feature
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coord<f64>),
    /// Building footprint, reduced to its centroid
    Area(MultiPolygon<f64>),
}

/// One input feature in the dataset CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub shape: Shape,
    pub properties: Map<String, Value>,
}

/// A GeoJSON feature collection read as points
#[derive(Debug, Clone, PartialEq)]
pub struct PointLayer {
    pub crs: Crs,
    pub features: Vec<Feature>,
}

impl PointLayer {
    pub fn read(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let value: Value = serde_json::from_reader(reader)?;
        let layer = Self::from_geojson(&value)?;
        debug!("Read {} features from {}", layer.len(), path.display());
        Ok(layer)
    }

    pub fn from_geojson(value: &Value) -> Result<Self> {
        if value.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
            return Err(Error::InvalidInput(
                "expected a GeoJSON FeatureCollection".to_string(),
            ));
        }

        let crs_name = value
            .get("crs")
            .and_then(|crs| crs.get("properties"))
            .and_then(|props| props.get("name"))
            .and_then(Value::as_str);
        let crs = Crs::from_name(crs_name)?;

        let features = value
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::InvalidInput("FeatureCollection has no features array".to_string()))?
            .iter()
            .enumerate()
            .map(|(index, feature)| parse_feature(index, feature))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { crs, features })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Planar and geographic location of each feature, in input order
    pub fn positions(&self, reprojector: &Reprojector) -> Result<Vec<Position>> {
        self.features
            .iter()
            .enumerate()
            .map(|(index, feature)| match &feature.shape {
                Shape::Point(coord) => {
                    let (planar, geographic) = locate(reprojector, self.crs, index, *coord)?;
                    Ok(Position { planar, geographic })
                }
                Shape::Area(footprint) => {
                    let planar_footprint = footprint
                        .try_map_coords(|c| locate(reprojector, self.crs, index, c).map(|(planar, _)| planar))?;
                    let centroid = planar_footprint.centroid().ok_or_else(|| {
                        Error::GeometryError(format!("feature {index} has an empty footprint"))
                    })?;
                    let planar = centroid.0;
                    Ok(Position {
                        planar,
                        geographic: reprojector.to_geographic(planar),
                    })
                }
            })
            .collect()
    }

    pub fn houses(&self, reprojector: &Reprojector) -> Result<Vec<House>> {
        Ok(self
            .positions(reprojector)?
            .into_iter()
            .enumerate()
            .map(|(i, position)| House::new(HouseId(i), position))
            .collect())
    }

    pub fn stops(&self, reprojector: &Reprojector) -> Result<Vec<Stop>> {
        Ok(self
            .positions(reprojector)?
            .into_iter()
            .enumerate()
            .map(|(i, position)| Stop::new(StopId(i), position))
            .collect())
    }
}

fn parse_feature(index: usize, feature: &Value) -> Result<Feature> {
    let geometry = match feature.get("geometry") {
        None | Some(Value::Null) => {
            return Err(Error::InvalidInput(format!("feature {index} has no geometry")));
        }
        Some(geometry) => geometry,
    };

    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or_default();
    let coordinates = geometry
        .get("coordinates")
        .cloned()
        .ok_or_else(|| Error::InvalidInput(format!("feature {index} geometry has no coordinates")))?;

    let shape = match kind {
        "Point" => {
            let values: Vec<f64> = serde_json::from_value(coordinates)?;
            Shape::Point(position(index, &values)?)
        }
        "Polygon" => {
            let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(coordinates)?;
            Shape::Area(MultiPolygon(vec![polygon(index, &rings)?]))
        }
        "MultiPolygon" => {
            let parts: Vec<Vec<Vec<Vec<f64>>>> = serde_json::from_value(coordinates)?;
            let polygons = parts
                .iter()
                .map(|rings| polygon(index, rings))
                .collect::<Result<Vec<_>>>()?;
            Shape::Area(MultiPolygon(polygons))
        }
        other => {
            return Err(Error::InvalidInput(format!(
                "feature {index} has unsupported geometry type '{other}'"
            )));
        }
    };

    let properties = match feature.get("properties") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    Ok(Feature { shape, properties })
}

/// Reproject one dataset coordinate, rejecting anything off the globe
fn locate(reprojector: &Reprojector, crs: Crs, index: usize, coord: Coord<f64>) -> Result<(Coord<f64>, Coord<f64>)> {
    reprojector.normalize(coord, crs).ok_or_else(|| {
        Error::InvalidInput(format!(
            "feature {index} has coordinate ({}, {}) outside longitude [-180, 180] / latitude [-90, 90] \
             once read as {crs:?}; projected data needs a crs member",
            coord.x, coord.y
        ))
    })
}

fn position(index: usize, values: &[f64]) -> Result<Coord<f64>> {
    match values {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        _ => Err(Error::InvalidInput(format!(
            "feature {index} has an invalid position {values:?}"
        ))),
    }
}

fn polygon(index: usize, rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| {
        ring.iter()
            .map(|p| position(index, p))
            .collect::<Result<Vec<_>>>()
            .map(LineString::from)
    });

    let exterior = rings
        .next()
        .ok_or_else(|| Error::InvalidInput(format!("feature {index} has a polygon without rings")))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring_coordinates(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

fn distance_value(distance: f64) -> Value {
    if distance.is_finite() {
        json!(distance)
    } else {
        Value::Null
    }
}

fn write_collection(path: &Path, features: Vec<Value>) -> Result<()> {
    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    Ok(())
}

/// Write houses in input order with their `min_distance` (null when unreachable)
pub fn write_distances(path: &Path, layer: &PointLayer, houses: &[House]) -> Result<()> {
    if layer.len() != houses.len() {
        return Err(Error::InvalidInput(format!(
            "layer has {} features but {} houses were computed",
            layer.len(),
            houses.len()
        )));
    }

    let features = layer
        .features
        .iter()
        .zip(houses)
        .map(|(feature, house)| {
            let mut properties = feature.properties.clone();
            properties.insert("min_distance".to_string(), distance_value(house.min_distance));
            let g = house.position.geographic;
            json!({
                "type": "Feature",
                "properties": properties,
                "geometry": { "type": "Point", "coordinates": [g.x, g.y] },
            })
        })
        .collect();

    write_collection(path, features)
}

/// Partition polygons in geographic degrees, one feature per partition
pub fn write_partitions(path: &Path, partitions: &[TracePartition], reprojector: &Reprojector) -> Result<()> {
    let features = partitions
        .iter()
        .map(|partition| {
            let geographic = partition.polygon.map_coords(|c| reprojector.to_geographic(c));
            let rings: Vec<Vec<[f64; 2]>> = std::iter::once(geographic.exterior())
                .chain(geographic.interiors())
                .map(ring_coordinates)
                .collect();
            json!({
                "type": "Feature",
                "properties": { "partition": partition.index, "stops": partition.stops },
                "geometry": { "type": "Polygon", "coordinates": rings },
            })
        })
        .collect();

    write_collection(path, features)
}

/// One straight line per evaluated (stop, house) pair
pub fn write_trace_lines(path: &Path, lines: &[TraceLine]) -> Result<()> {
    let features = lines
        .iter()
        .map(|line| {
            json!({
                "type": "Feature",
                "properties": {
                    "stop": line.pair.stop.0,
                    "house": line.pair.house.0,
                    "distance": distance_value(line.pair.distance),
                },
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[line.from.x, line.from.y], [line.to.x, line.to.y]],
                },
            })
        })
        .collect();

    write_collection(path, features)
}
