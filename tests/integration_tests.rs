//! Integration tests for butterfly-reach
//!
//! A wiremock server stands in for the routing service: it decodes the
//! polyline of each table request and answers with great-circle distances,
//! so the whole file-to-file run can be checked against known values.

use std::path::Path;
use std::time::Duration;

use butterfly_reach::{Error, OverwriteBehavior, ReachConfig, RetryPolicy, RouterConfig};
use geo::{HaversineDistance, Point};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Stop A, stop B (about 1.9 km east of A)
const STOPS: [(f64, f64); 2] = [(82.9200, 55.0300), (82.9500, 55.0300)];

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
            out.push(u8::from_str_radix(hex, 16).unwrap());
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).unwrap()
}

fn indices(request: &Request, key: &str) -> Vec<usize> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.split(';').map(|i| i.parse().unwrap()).collect())
        .unwrap_or_default()
}

/// Answers table requests with haversine distances and no snapping
struct GreatCircleTable;

impl Respond for GreatCircleTable {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let segment = request.url.path_segments().unwrap().last().unwrap().to_string();
        let encoded = percent_decode(&segment);
        let line = polyline::decode_polyline(
            encoded.trim_start_matches("polyline(").trim_end_matches(')'),
            5,
        )
        .unwrap();
        let points: Vec<Point<f64>> = line.0.iter().map(|c| Point::from(*c)).collect();

        let sources = indices(request, "sources");
        let destinations = indices(request, "destinations");
        let distances: Vec<Vec<f64>> = sources
            .iter()
            .map(|&s| destinations.iter().map(|&d| points[s].haversine_distance(&points[d])).collect())
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "code": "Ok",
            "distances": distances,
            "sources": sources.iter().map(|_| json!({ "distance": 0.0 })).collect::<Vec<_>>(),
            "destinations": destinations.iter().map(|_| json!({ "distance": 0.0 })).collect::<Vec<_>>(),
        }))
    }
}

fn point_feature(lon: f64, lat: f64, name: &str) -> Value {
    json!({
        "type": "Feature",
        "properties": { "name": name },
        "geometry": { "type": "Point", "coordinates": [lon, lat] },
    })
}

fn write_layer(path: &Path, features: Vec<Value>) {
    let collection = json!({ "type": "FeatureCollection", "features": features });
    std::fs::write(path, serde_json::to_string(&collection).unwrap()).unwrap();
}

/// Houses: 100 m north of A, a footprint 200 m east of B, one far away
fn fixture() -> TempDir {
    let dir = tempdir().unwrap();
    write_layer(
        &dir.path().join("stops.geojson"),
        STOPS.iter().enumerate().map(|(i, &(lon, lat))| point_feature(lon, lat, &format!("stop-{i}"))).collect(),
    );

    let (bx, by) = (STOPS[1].0 + 0.0031, STOPS[1].1);
    let footprint = json!({
        "type": "Feature",
        "properties": { "name": "footprint" },
        "geometry": { "type": "Polygon", "coordinates": [[
            [bx - 0.0001, by - 0.0001], [bx + 0.0001, by - 0.0001],
            [bx + 0.0001, by + 0.0001], [bx - 0.0001, by + 0.0001],
            [bx - 0.0001, by - 0.0001]
        ]] },
    });
    write_layer(
        &dir.path().join("houses.geojson"),
        vec![
            point_feature(STOPS[0].0, STOPS[0].1 + 0.0009, "north-of-a"),
            footprint,
            point_feature(83.2000, 55.2000, "far"),
        ],
    );
    dir
}

fn config(dir: &Path, server: &MockServer, attempts: u32) -> ReachConfig {
    let router = RouterConfig {
        retry: RetryPolicy {
            max_attempts: attempts,
            backoff_step: Duration::ZERO,
        },
        ..RouterConfig::new(server.uri())
    };
    let mut config = ReachConfig::new(
        dir.join("houses.geojson"),
        dir.join("stops.geojson"),
        dir.join("out.geojson"),
        router,
    );
    config.overwrite = OverwriteBehavior::Force;
    config
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_end_to_end_distances() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/table/v1/driving/polyline\(.+\)$"))
        .respond_with(GreatCircleTable)
        .mount(&server)
        .await;

    let dir = fixture();
    let stats = butterfly_reach::run(&config(dir.path(), &server, 3)).await.unwrap();

    assert_eq!(stats.partitions, 2);
    assert_eq!(stats.houses_reached, 2);
    assert_eq!(stats.requests, 2);

    let output = read_json(&dir.path().join("out.geojson"));
    let features = output["features"].as_array().unwrap();
    assert_eq!(features.len(), 3);

    assert_eq!(features[0]["properties"]["name"], "north-of-a");
    let north = features[0]["properties"]["min_distance"].as_f64().unwrap();
    assert!((north - 100.0).abs() < 3.0, "north-of-a at {north}");

    assert_eq!(features[1]["properties"]["name"], "footprint");
    assert_eq!(features[1]["geometry"]["type"], "Point");
    let east = features[1]["properties"]["min_distance"].as_f64().unwrap();
    assert!((east - 198.0).abs() < 5.0, "footprint at {east}");

    assert_eq!(features[2]["properties"]["name"], "far");
    assert!(features[2]["properties"]["min_distance"].is_null());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(GreatCircleTable)
        .mount(&server)
        .await;

    let dir = fixture();
    let stats = butterfly_reach::run(&config(dir.path(), &server, 3)).await.unwrap();

    assert_eq!(stats.batches, 2);
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.houses_reached, 2);
}

#[tokio::test]
async fn test_exhausted_retries_abort_without_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let dir = fixture();
    let result = butterfly_reach::run(&config(dir.path(), &server, 2)).await;

    match result {
        Err(Error::HttpStatus { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected HTTP status error, got {other:?}"),
    }
    assert!(!dir.path().join("out.geojson").exists());
}

#[tokio::test]
async fn test_no_clobber_stops_before_routing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(GreatCircleTable)
        .expect(0)
        .mount(&server)
        .await;

    let dir = fixture();
    std::fs::write(dir.path().join("out.geojson"), "keep me").unwrap();

    let mut config = config(dir.path(), &server, 3);
    config.overwrite = OverwriteBehavior::NeverOverwrite;

    assert!(butterfly_reach::run(&config).await.is_err());
    assert_eq!(std::fs::read_to_string(dir.path().join("out.geojson")).unwrap(), "keep me");
}

#[tokio::test]
async fn test_debug_trace_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(GreatCircleTable)
        .mount(&server)
        .await;

    let dir = fixture();
    let debug_dir = dir.path().join("debug");
    let mut config = config(dir.path(), &server, 3);
    config.debug_dir = Some(debug_dir.clone());

    butterfly_reach::run(&config).await.unwrap();

    let partitions = read_json(&debug_dir.join(butterfly_reach::PARTITIONS_FILE));
    assert_eq!(partitions["features"].as_array().unwrap().len(), 2);
    assert_eq!(partitions["features"][0]["geometry"]["type"], "Polygon");

    let lines = read_json(&debug_dir.join(butterfly_reach::DEBUG_LINES_FILE));
    let lines = lines["features"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l["geometry"]["type"] == "LineString"));
}

#[tokio::test]
async fn test_unsupported_crs_is_reported() {
    let server = MockServer::start().await;
    let dir = fixture();
    let collection = json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "EPSG:2154" } },
        "features": [point_feature(652_000.0, 6_862_000.0, "lambert")],
    });
    std::fs::write(dir.path().join("stops.geojson"), collection.to_string()).unwrap();

    let result = butterfly_reach::run(&config(dir.path(), &server, 1)).await;
    assert!(matches!(result, Err(Error::UnsupportedCrs(_))));
}
