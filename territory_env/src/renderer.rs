//! Basemap rendering seam.

use crate::crs::Crs;
use crate::error::RenderError;
use geo::{BoundingRect, Coord, Polygon, Rect};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// An XYZ tile source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileProvider {
    /// Display name (for logging)
    pub name: String,
    
    /// URL template with `{z}`, `{x}`, `{y}` and optionally `{s}`
    pub url_template: String,
    
    /// Credit line printed under the map
    pub attribution: String,
    
    /// Sent with every tile request
    pub user_agent: String,
    
    /// Tile edge length in pixels
    pub tile_size: u32,
}

impl TileProvider {
    /// OpenStreetMap standard (Mapnik) tiles.
    pub fn openstreetmap() -> Self {
        Self {
            name: "OpenStreetMap.Mapnik".to_string(),
            url_template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            attribution: "(C) OpenStreetMap contributors".to_string(),
            user_agent: concat!("territory-maps/", env!("CARGO_PKG_VERSION")).to_string(),
            tile_size: 256,
        }
    }
    
    /// Expands the template for one tile.
    pub fn tile_url(&self, z: u8, x: u32, y: u32) -> String {
        self.url_template
            .replace("{s}", "a")
            .replace("{z}", &z.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
    }
}

impl Default for TileProvider {
    fn default() -> Self {
        Self::openstreetmap()
    }
}

/// The visible window of a map image.
///
/// `extent` is in `crs` units; the raster is `width_px × height_px`
/// with the extent's aspect ratio matching the raster's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapFrame {
    pub extent: Rect<f64>,
    pub crs: Crs,
    pub width_px: u32,
    pub height_px: u32,
}

impl MapFrame {
    /// Fits a frame around a boundary.
    ///
    /// The bounding box is padded by `margin_ratio` of its span on each
    /// side, then widened along one axis to match the pixel aspect.
    /// Returns `None` for an empty polygon or a zero-sized raster.
    pub fn fit(
        boundary: &Polygon<f64>,
        crs: Crs,
        width_px: u32,
        height_px: u32,
        margin_ratio: f64,
    ) -> Option<Self> {
        if width_px == 0 || height_px == 0 {
            return None;
        }
        let bbox = boundary.bounding_rect()?;
        
        let span_x = bbox.width().max(f64::EPSILON);
        let span_y = bbox.height().max(f64::EPSILON);
        let pad = margin_ratio.max(0.0);
        let mut half_w = span_x * (0.5 + pad);
        let mut half_h = span_y * (0.5 + pad);
        
        let target_aspect = width_px as f64 / height_px as f64;
        if half_w / half_h < target_aspect {
            half_w = half_h * target_aspect;
        } else {
            half_h = half_w / target_aspect;
        }
        
        let center = bbox.center();
        let extent = Rect::new(
            Coord { x: center.x - half_w, y: center.y - half_h },
            Coord { x: center.x + half_w, y: center.y + half_h },
        );
        
        Some(Self {
            extent,
            crs,
            width_px,
            height_px,
        })
    }
    
    /// Map units per pixel (identical on both axes).
    pub fn resolution(&self) -> f64 {
        self.extent.width() / self.width_px as f64
    }
    
    /// World coordinate → fractional pixel position (origin top-left).
    pub fn to_pixel(&self, c: Coord<f64>) -> (f64, f64) {
        let res = self.resolution();
        (
            (c.x - self.extent.min().x) / res,
            (self.extent.max().y - c.y) / res,
        )
    }
    
    /// Centre of pixel `(px, py)` in world coordinates.
    pub fn pixel_center(&self, px: u32, py: u32) -> Coord<f64> {
        let res = self.resolution();
        Coord {
            x: self.extent.min().x + (px as f64 + 0.5) * res,
            y: self.extent.max().y - (py as f64 + 0.5) * res,
        }
    }
}

/// Turns a territory frame into a basemap raster.
///
/// Treated as an unreliable external service: any error is absorbed by
/// the caller, which then draws a boundary-only map.
pub trait MapRenderer: Send + Sync {
    /// Renders a basemap exactly covering `frame`.
    ///
    /// # Arguments
    /// * `boundary` - Territory polygon in `frame.crs`
    /// * `frame` - Extent and raster size to fill
    /// * `zoom` - Preferred tile zoom level
    /// * `provider` - Tile source
    fn render(
        &self,
        boundary: &Polygon<f64>,
        frame: &MapFrame,
        zoom: u8,
        provider: &TileProvider,
    ) -> Result<RgbaImage, RenderError>;
}

/// Renderer used when basemaps are switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRenderer;

impl MapRenderer for DisabledRenderer {
    fn render(
        &self,
        _boundary: &Polygon<f64>,
        _frame: &MapFrame,
        _zoom: u8,
        _provider: &TileProvider,
    ) -> Result<RgbaImage, RenderError> {
        Err(RenderError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;
    
    fn square() -> Polygon<f64> {
        polygon![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0), (x: 100.0, y: 100.0), (x: 0.0, y: 100.0)]
    }
    
    #[test]
    fn test_frame_matches_raster_aspect() {
        let frame = MapFrame::fit(&square(), Crs::WebMercator, 1500, 1200, 0.05).unwrap();
        
        assert_relative_eq!(
            frame.extent.width() / frame.extent.height(),
            1500.0 / 1200.0,
            epsilon = 1e-9
        );
        // Square plus 5% padding on each side governs the height.
        assert_relative_eq!(frame.extent.height(), 110.0, epsilon = 1e-9);
    }
    
    #[test]
    fn test_pixel_mapping() {
        let frame = MapFrame::fit(&square(), Crs::WebMercator, 100, 100, 0.0).unwrap();
        let (px, py) = frame.to_pixel(Coord { x: 0.0, y: 100.0 });
        assert_relative_eq!(px, 0.0, epsilon = 1e-9);
        assert_relative_eq!(py, 0.0, epsilon = 1e-9);
        
        let c = frame.pixel_center(99, 99);
        assert_relative_eq!(c.x, 99.5, epsilon = 1e-9);
        assert_relative_eq!(c.y, 0.5, epsilon = 1e-9);
    }
    
    #[test]
    fn test_zero_raster_has_no_frame() {
        assert!(MapFrame::fit(&square(), Crs::WebMercator, 0, 10, 0.05).is_none());
    }
    
    #[test]
    fn test_tile_url() {
        let provider = TileProvider::openstreetmap();
        assert_eq!(
            provider.tile_url(18, 41_000, 99_000),
            "https://tile.openstreetmap.org/18/41000/99000.png"
        );
    }
    
    #[test]
    fn test_disabled_renderer() {
        let frame = MapFrame::fit(&square(), Crs::WebMercator, 10, 10, 0.0).unwrap();
        let result = DisabledRenderer.render(&square(), &frame, 18, &TileProvider::default());
        assert!(matches!(result, Err(RenderError::Disabled)));
    }
}
