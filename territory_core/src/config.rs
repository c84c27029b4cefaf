//! Run configuration.
//!
//! One immutable `ReportConfig` is built at startup (defaults, optionally
//! overlaid by a TOML file) and shared by every pipeline stage.

use crate::address::AddressComponent;
use serde::{Deserialize, Serialize};
use std::path::Path;
use territory_env::{Crs, PageSpec, Rgb, TileProvider};
use thiserror::Error;

/// Points per inch
pub const INCH: f32 = 72.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

fn aliases(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// ADDRESS SOURCE
// =============================================================================

/// Attribute-name aliases per address component.
///
/// For each component the first alias carrying a non-blank value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    pub house_number: Vec<String>,
    pub street_prefix: Vec<String>,
    pub street_name: Vec<String>,
    pub street_type: Vec<String>,
    pub street_suffix: Vec<String>,
    pub unit_type: Vec<String>,
    pub unit_number: Vec<String>,
    pub city: Vec<String>,
    pub state: Vec<String>,
    pub zip: Vec<String>,
    
    /// Use a purely numeric placemark label as house number when no
    /// alias yields one
    pub label_fallback: bool,
}

impl AddressConfig {
    pub fn aliases(&self, component: AddressComponent) -> &[String] {
        match component {
            AddressComponent::HouseNumber => &self.house_number,
            AddressComponent::StreetPrefix => &self.street_prefix,
            AddressComponent::StreetName => &self.street_name,
            AddressComponent::StreetType => &self.street_type,
            AddressComponent::StreetSuffix => &self.street_suffix,
            AddressComponent::UnitType => &self.unit_type,
            AddressComponent::UnitNumber => &self.unit_number,
            AddressComponent::City => &self.city,
            AddressComponent::State => &self.state,
            AddressComponent::Zip => &self.zip,
        }
    }
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            house_number: aliases(&["STREET_NUM", "AD_ADDRESS", "AM_ADDRE_1"]),
            street_prefix: aliases(&["STREET_PRE", "AM_DIR_PRE"]),
            street_name: aliases(&["STREET_NAM", "AM_STR_NAM"]),
            street_type: aliases(&["STREET_TYP", "AM_STR_TYP"]),
            street_suffix: aliases(&["STREET_SUF", "AM_DIR_SUF"]),
            unit_type: aliases(&["UNIT_TYPE"]),
            unit_number: aliases(&["UNIT_NUMBE"]),
            city: aliases(&["CITY", "AM_TOWN"]),
            state: aliases(&["STATE", "AM_STATE"]),
            zip: aliases(&["ZIP", "AM_ZIP"]),
            label_fallback: true,
        }
    }
}

// =============================================================================
// TERRITORY TABLE
// =============================================================================

/// Reference to a table column, by zero-based position or header text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Header(String),
}

/// Where the three logical territory fields live in the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSchema {
    pub name: ColumnRef,
    pub number: ColumnRef,
    pub boundary: ColumnRef,
    
    /// Cell values treated as missing (compared after trimming)
    pub missing_values: Vec<String>,
}

impl TableSchema {
    /// Schema addressing columns by position.
    pub fn by_index(name: usize, number: usize, boundary: usize) -> Self {
        Self {
            name: ColumnRef::Index(name),
            number: ColumnRef::Index(number),
            boundary: ColumnRef::Index(boundary),
            ..Self::default()
        }
    }
    
    pub fn is_missing(&self, value: &str) -> bool {
        let value = value.trim();
        value.is_empty() || self.missing_values.iter().any(|m| m == value)
    }
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            name: ColumnRef::Index(1),
            number: ColumnRef::Index(3),
            boundary: ColumnRef::Index(11),
            missing_values: aliases(&[
                "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND",
                "1.#QNAN", "<NA>", "N/A", "NA", "NULL", "NaN", "n/a", "nan", "null",
            ]),
        }
    }
}

// =============================================================================
// COORDINATE SYSTEMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    /// CRS of raw input coordinates
    pub source: Crs,
    
    /// CRS used for every spatial comparison and for the map
    pub working: Crs,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self {
            source: Crs::Wgs84,
            working: Crs::WebMercator,
        }
    }
}

// =============================================================================
// MAP IMAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Preferred basemap tile zoom
    pub zoom: u8,
    pub dpi: u32,
    pub width_in: f32,
    pub height_in: f32,
    
    /// Extra space around the boundary, as a fraction of its extent
    pub margin_ratio: f64,
    
    pub boundary_color: Rgb,
    /// Outline width in points
    pub boundary_width: f32,
    
    pub mask_color: Rgb,
    pub mask_alpha: f32,
    
    /// Upper bound on tiles fetched per map
    pub max_tiles: u32,
    
    pub provider: TileProvider,
}

impl MapConfig {
    /// Raster size in pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.width_in * self.dpi as f32).round().max(1.0) as u32,
            (self.height_in * self.dpi as f32).round().max(1.0) as u32,
        )
    }
    
    /// Outline width in pixels at the configured DPI.
    pub fn boundary_width_px(&self) -> f64 {
        (self.boundary_width * self.dpi as f32 / INCH) as f64
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            zoom: 18,
            dpi: 200,
            width_in: 7.5,
            height_in: 6.0,
            margin_ratio: 0.05,
            boundary_color: Rgb::new(1.0, 0.0, 0.0),
            boundary_width: 1.5,
            mask_color: Rgb::BLACK,
            mask_alpha: 0.4,
            max_tiles: 256,
            provider: TileProvider::default(),
        }
    }
}

// =============================================================================
// DOCUMENT LAYOUT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub page: PageSpec,
    
    pub title_size: f32,
    pub title_space_after: f32,
    
    /// Body text and table font size
    pub body_size: f32,
    
    /// Gap below the map image
    pub image_space_after: f32,
    
    /// Address / Unit / Locality widths as fractions of the content width
    pub column_fractions: [f32; 3],
    
    pub header_background: Rgb,
    pub header_text: Rgb,
    pub grid: Rgb,
    pub group_background: Rgb,
    pub zebra_even: Rgb,
    pub zebra_odd: Rgb,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            page: PageSpec::letter(0.5 * INCH),
            title_size: 16.0,
            title_space_after: 0.15 * INCH,
            body_size: 8.0,
            image_space_after: 0.2 * INCH,
            column_fractions: [0.45, 0.15, 0.35],
            header_background: Rgb::new(64.0 / 255.0, 70.0 / 255.0, 110.0 / 255.0),
            header_text: Rgb::grey(245.0 / 255.0),
            grid: Rgb::grey(169.0 / 255.0),
            group_background: Rgb::grey(0.92),
            zebra_even: Rgb::WHITE,
            zebra_odd: Rgb::grey(0.96),
        }
    }
}

// =============================================================================
// TOP LEVEL
// =============================================================================

/// Everything a run needs to know besides its input paths.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub addresses: AddressConfig,
    pub table: TableSchema,
    pub crs: CrsConfig,
    pub map: MapConfig,
    pub layout: LayoutConfig,
}

impl ReportConfig {
    /// Parses a TOML document; omitted keys keep their defaults.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }
    
    /// Loads a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }
}
