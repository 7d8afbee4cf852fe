//! Projection adapter
//!
//! All metric work (buffers, distances, spatial joins) happens in an
//! Albers equal-area conic frame; the routing API and the output speak
//! longitude/latitude degrees. Inputs may also arrive in Web Mercator.

use geo::Coord;

use crate::core::error::{Error, Result};

/// WGS84 semi-major axis (meters)
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Spherical Web Mercator radius (meters)
const WEB_MERCATOR_R: f64 = 6_378_137.0;

/// Convergence threshold of the inverse latitude iteration (radians)
const INVERSE_TOLERANCE: f64 = 1e-12;

const INVERSE_MAX_ITERATIONS: usize = 25;

/// Coordinate reference systems a dataset may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Crs {
    /// Longitude/latitude degrees on WGS84 (EPSG:4326, CRS84)
    #[default]
    Geographic,
    /// Spherical Web Mercator meters (EPSG:3857)
    WebMercator,
}

impl Crs {
    /// Resolve a CRS name as found in a GeoJSON `crs` member.
    ///
    /// `None` means the dataset declares nothing and is taken as geographic.
    pub fn from_name(name: Option<&str>) -> Result<Self> {
        let Some(name) = name else {
            return Ok(Crs::Geographic);
        };

        let normalized = name.trim().to_ascii_uppercase();
        let code = normalized
            .rsplit(|c| c == ':' || c == '/')
            .find(|part| !part.is_empty())
            .unwrap_or("");

        match code {
            "4326" | "CRS84" => Ok(Crs::Geographic),
            "3857" | "900913" | "3785" => Ok(Crs::WebMercator),
            _ => Err(Error::UnsupportedCrs(name.to_string())),
        }
    }

    /// Convert a coordinate in this CRS to geographic degrees
    pub fn to_geographic(self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Geographic => coord,
            Crs::WebMercator => Coord {
                x: (coord.x / WEB_MERCATOR_R).to_degrees(),
                y: (2.0 * (coord.y / WEB_MERCATOR_R).exp().atan() - std::f64::consts::FRAC_PI_2)
                    .to_degrees(),
            },
        }
    }
}

/// Albers equal-area conic projection on the WGS84 ellipsoid
#[derive(Debug, Clone, PartialEq)]
pub struct AlbersEqualArea {
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl AlbersEqualArea {
    /// Albers Siberia: parallels 52°N/64°N, origin 0°N 105°E, false easting 18 500 km
    pub fn siberia() -> Self {
        Self::build(52.0, 64.0, 0.0, 105.0, 18_500_000.0, 0.0)
    }

    fn build(
        lat1: f64,
        lat2: f64,
        lat0: f64,
        lon0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let e = e2.sqrt();

        let (phi1, phi2, phi0) = (lat1.to_radians(), lat2.to_radians(), lat0.to_radians());
        let (m1, m2) = (m(phi1, e2), m(phi2, e2));
        let (q1, q2, q0) = (q(phi1, e, e2), q(phi2, e, e2), q(phi0, e, e2));

        let n = if (phi1 - phi2).abs() < 1e-10 {
            phi1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;

        Self {
            lon0: lon0.to_radians(),
            false_easting,
            false_northing,
            e,
            e2,
            n,
            c,
            rho0: WGS84_A * (c - n * q0).sqrt() / n,
        }
    }

    /// Geographic degrees to planar meters
    pub fn forward(&self, lonlat: Coord<f64>) -> Coord<f64> {
        let phi = lonlat.y.to_radians();
        let dlon = wrap_pi(lonlat.x.to_radians() - self.lon0);

        let rho = WGS84_A * (self.c - self.n * q(phi, self.e, self.e2)).max(0.0).sqrt() / self.n;
        let theta = self.n * dlon;

        Coord {
            x: self.false_easting + rho * theta.sin(),
            y: self.false_northing + self.rho0 - rho * theta.cos(),
        }
    }

    /// Planar meters back to geographic degrees
    pub fn inverse(&self, xy: Coord<f64>) -> Coord<f64> {
        let x = xy.x - self.false_easting;
        let y = self.rho0 - (xy.y - self.false_northing);

        let sign = self.n.signum();
        let rho = (x * x + y * y).sqrt() * sign;
        let theta = (x * sign).atan2(y * sign);

        let q_value = (self.c - (rho * self.n / WGS84_A).powi(2)) / self.n;
        let phi = self.latitude_from_q(q_value);
        let lon = wrap_pi(self.lon0 + theta / self.n);

        Coord {
            x: lon.to_degrees(),
            y: phi.to_degrees(),
        }
    }

    /// Solve q(phi) = target for phi by fixed-point iteration
    fn latitude_from_q(&self, target: f64) -> f64 {
        let pole_q = q(std::f64::consts::FRAC_PI_2, self.e, self.e2);
        if target.abs() >= pole_q {
            return std::f64::consts::FRAC_PI_2.copysign(target);
        }

        let mut phi = (target / 2.0).clamp(-1.0, 1.0).asin();
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let sin_phi = phi.sin();
            let es = self.e * sin_phi;
            let one_minus = 1.0 - self.e2 * sin_phi * sin_phi;

            let delta = one_minus * one_minus / (2.0 * phi.cos())
                * (target / (1.0 - self.e2) - sin_phi / one_minus
                    + 1.0 / (2.0 * self.e) * ((1.0 - es) / (1.0 + es)).ln());
            phi += delta;

            if delta.abs() < INVERSE_TOLERANCE {
                break;
            }
        }
        phi
    }
}

/// Moves points between the dataset CRS, the planar frame and geographic degrees
#[derive(Debug, Clone)]
pub struct Reprojector {
    planar: AlbersEqualArea,
}

impl Default for Reprojector {
    fn default() -> Self {
        Self {
            planar: AlbersEqualArea::siberia(),
        }
    }
}

impl Reprojector {
    /// Dataset coordinate to (planar, geographic).
    ///
    /// `None` when the coordinate does not land on the globe, which is what
    /// projected data read without a `crs` member looks like.
    pub fn normalize(&self, coord: Coord<f64>, crs: Crs) -> Option<(Coord<f64>, Coord<f64>)> {
        let geographic = crs.to_geographic(coord);
        if !is_on_globe(geographic) {
            return None;
        }
        Some((self.planar.forward(geographic), geographic))
    }

    pub fn to_planar(&self, geographic: Coord<f64>) -> Coord<f64> {
        self.planar.forward(geographic)
    }

    pub fn to_geographic(&self, planar: Coord<f64>) -> Coord<f64> {
        self.planar.inverse(planar)
    }
}

fn m(phi: f64, e2: f64) -> f64 {
    let sin_phi = phi.sin();
    phi.cos() / (1.0 - e2 * sin_phi * sin_phi).sqrt()
}

fn q(phi: f64, e: f64, e2: f64) -> f64 {
    let sin_phi = phi.sin();
    let es = e * sin_phi;
    (1.0 - e2) * (sin_phi / (1.0 - e2 * sin_phi * sin_phi) - 1.0 / (2.0 * e) * ((1.0 - es) / (1.0 + es)).ln())
}

/// Finite longitude within [-180, 180] and latitude within [-90, 90]
fn is_on_globe(geographic: Coord<f64>) -> bool {
    geographic.x.is_finite()
        && geographic.y.is_finite()
        && geographic.x.abs() <= 180.0
        && geographic.y.abs() <= 90.0
}

fn wrap_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    (angle + PI).rem_euclid(TAU) - PI
}
