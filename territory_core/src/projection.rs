//! Coordinate transformation between WGS84 and Web Mercator.
//!
//! Spherical Mercator (EPSG:3857) is closed-form, so no external
//! projection library is involved.

use geo::{Coord, MapCoords, Point, Polygon};
use std::f64::consts::PI;
use territory_env::Crs;
use thiserror::Error;

/// WGS84 semi-major axis used by EPSG:3857 (metres)
const EARTH_RADIUS: f64 = 6378137.0;

/// Latitude where Web Mercator's square world ends (degrees)
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    #[error("Non-finite coordinate ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
    
    #[error("Coordinate ({x}, {y}) outside the {crs} domain")]
    OutOfDomain { x: f64, y: f64, crs: Crs },
}

/// Transforms one coordinate from `from` to `to`.
pub fn transform(c: Coord<f64>, from: Crs, to: Crs) -> Result<Coord<f64>, ProjectionError> {
    if !c.x.is_finite() || !c.y.is_finite() {
        return Err(ProjectionError::NonFinite { x: c.x, y: c.y });
    }
    match (from, to) {
        (Crs::Wgs84, Crs::Wgs84) | (Crs::WebMercator, Crs::WebMercator) => Ok(c),
        (Crs::Wgs84, Crs::WebMercator) => {
            if c.y.abs() > MAX_MERCATOR_LAT || c.x.abs() > 180.0 {
                return Err(ProjectionError::OutOfDomain { x: c.x, y: c.y, crs: from });
            }
            let x = EARTH_RADIUS * c.x.to_radians();
            let y = EARTH_RADIUS * (PI / 4.0 + c.y.to_radians() / 2.0).tan().ln();
            Ok(Coord { x, y })
        }
        (Crs::WebMercator, Crs::Wgs84) => {
            let limit = PI * EARTH_RADIUS;
            if c.x.abs() > limit * (1.0 + 1e-12) || c.y.abs() > limit * (1.0 + 1e-12) {
                return Err(ProjectionError::OutOfDomain { x: c.x, y: c.y, crs: from });
            }
            let lon = (c.x / EARTH_RADIUS).to_degrees();
            let lat = (2.0 * (c.y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
            Ok(Coord { x: lon, y: lat })
        }
    }
}

/// Geometry that can be moved between coordinate systems.
pub trait Reproject: Sized {
    fn reproject(&self, from: Crs, to: Crs) -> Result<Self, ProjectionError>;
}

impl Reproject for Point<f64> {
    fn reproject(&self, from: Crs, to: Crs) -> Result<Self, ProjectionError> {
        transform(self.0, from, to).map(Point)
    }
}

impl Reproject for Polygon<f64> {
    fn reproject(&self, from: Crs, to: Crs) -> Result<Self, ProjectionError> {
        self.try_map_coords(|c| transform(c, from, to))
    }
}
