//! Coordinate reference system identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The coordinate systems the pipeline understands.
///
/// Source data arrives as WGS84 longitude/latitude; all spatial
/// comparisons happen in Web Mercator metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// EPSG:4326, degrees
    Wgs84,
    
    /// EPSG:3857, spherical Web Mercator metres
    WebMercator,
}

impl Crs {
    /// Returns the EPSG code string.
    pub fn code(&self) -> &'static str {
        match self {
            Crs::Wgs84 => "EPSG:4326",
            Crs::WebMercator => "EPSG:3857",
        }
    }
    
    /// True for geographic (unprojected) systems.
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Crs {
    type Err = String;
    
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EPSG:4326" | "WGS84" | "4326" => Ok(Crs::Wgs84),
            "EPSG:3857" | "EPSG:900913" | "WEBMERCATOR" | "3857" => Ok(Crs::WebMercator),
            _ => Err(format!("Unknown coordinate system: {}", s)),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = String;
    
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.code().to_string()
    }
}
