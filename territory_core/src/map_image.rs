//! Map image composition: basemap, inverse mask and boundary outline.

use crate::config::MapConfig;
use geo::{Coord, EuclideanDistance, Line, Point, Polygon};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use std::path::Path;
use territory_env::{Crs, MapFrame, MapRenderer, RenderError, Rgb};
use tracing::debug;

/// A composed map raster.
#[derive(Debug)]
pub struct ComposedMap {
    pub image: RgbaImage,
    pub frame: MapFrame,
    
    /// Why no basemap was drawn, if none was
    pub render_error: Option<RenderError>,
}

impl ComposedMap {
    pub fn has_basemap(&self) -> bool {
        self.render_error.is_none()
    }
    
    /// Writes the raster as PNG.
    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.image.save_with_format(path, ImageFormat::Png)
    }
}

/// Draws territory maps according to a `MapConfig`.
#[derive(Debug, Clone)]
pub struct MapComposer {
    config: MapConfig,
}

impl MapComposer {
    pub fn new(config: MapConfig) -> Self {
        Self { config }
    }
    
    /// The frame a territory map covers.
    pub fn frame(&self, boundary: &Polygon<f64>, crs: Crs) -> Option<MapFrame> {
        let (width, height) = self.config.pixel_size();
        MapFrame::fit(boundary, crs, width, height, self.config.margin_ratio)
    }
    
    /// Renders the basemap and draws the boundary over it.
    ///
    /// A renderer failure is recorded in the result, not returned: the
    /// map then shows the outline on a blank canvas, without a mask.
    /// Only an empty frame is an error.
    pub fn compose(
        &self,
        renderer: &dyn MapRenderer,
        boundary: &Polygon<f64>,
        crs: Crs,
    ) -> Result<ComposedMap, RenderError> {
        let frame = self.frame(boundary, crs).ok_or(RenderError::EmptyFrame)?;
        
        let basemap = renderer
            .render(boundary, &frame, self.config.zoom, &self.config.provider)
            .map(|image| {
                if image.dimensions() == (frame.width_px, frame.height_px) {
                    image
                } else {
                    imageops::resize(&image, frame.width_px, frame.height_px, FilterType::CatmullRom)
                }
            });
        
        let (mut image, render_error) = match basemap {
            Ok(image) => (image, None),
            Err(e) => {
                debug!("No basemap: {}", e);
                (RgbaImage::from_pixel(frame.width_px, frame.height_px, Rgba([255, 255, 255, 255])), Some(e))
            }
        };
        
        let ring = pixel_ring(boundary, &frame);
        if render_error.is_none() {
            draw_mask(&mut image, &ring, self.config.mask_color, self.config.mask_alpha);
        }
        draw_outline(&mut image, &ring, self.config.boundary_color, self.config.boundary_width_px());
        
        Ok(ComposedMap {
            image,
            frame,
            render_error,
        })
    }
}

/// Exterior ring in fractional pixel coordinates.
fn pixel_ring(boundary: &Polygon<f64>, frame: &MapFrame) -> Vec<Coord<f64>> {
    boundary
        .exterior()
        .0
        .iter()
        .map(|c| {
            let (x, y) = frame.to_pixel(*c);
            Coord { x, y }
        })
        .collect()
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for (channel, target) in pixel.0.iter_mut().zip(color) {
        *channel = (*channel as f32 * (1.0 - alpha) + target as f32 * alpha).round() as u8;
    }
}

/// Darkens every pixel whose centre lies outside the ring.
///
/// Even-odd scanline fill over pixel centres.
fn draw_mask(image: &mut RgbaImage, ring: &[Coord<f64>], color: Rgb, alpha: f32) {
    let color = color.to_bytes();
    let (width, height) = image.dimensions();
    let mut crossings = Vec::new();
    
    for py in 0..height {
        let cy = py as f64 + 0.5;
        crossings.clear();
        for edge in ring.windows(2) {
            let (a, b) = (edge[0], edge[1]);
            if (a.y > cy) != (b.y > cy) {
                crossings.push(a.x + (cy - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(f64::total_cmp);
        
        let mut inside_spans = crossings.chunks_exact(2).map(|pair| (pair[0], pair[1])).peekable();
        for px in 0..width {
            let cx = px as f64 + 0.5;
            while inside_spans.peek().is_some_and(|&(_, end)| end <= cx) {
                inside_spans.next();
            }
            let inside = inside_spans.peek().is_some_and(|&(start, end)| start < cx && cx < end);
            if !inside {
                blend(image.get_pixel_mut(px, py), color, alpha);
            }
        }
    }
}

/// Strokes the ring with an antialiased line `width` pixels wide.
fn draw_outline(image: &mut RgbaImage, ring: &[Coord<f64>], color: Rgb, width: f64) {
    let color = color.to_bytes();
    let (w, h) = image.dimensions();
    let half = width / 2.0;
    let reach = half + 1.0;
    
    for edge in ring.windows(2) {
        let line = Line::new(edge[0], edge[1]);
        let x0 = (line.start.x.min(line.end.x) - reach).floor().max(0.0) as u32;
        let y0 = (line.start.y.min(line.end.y) - reach).floor().max(0.0) as u32;
        let x1 = ((line.start.x.max(line.end.x) + reach).ceil().max(0.0) as u32).min(w);
        let y1 = ((line.start.y.max(line.end.y) + reach).ceil().max(0.0) as u32).min(h);
        
        for py in y0..y1 {
            for px in x0..x1 {
                let center = Point::new(px as f64 + 0.5, py as f64 + 0.5);
                let coverage = (half + 0.5 - line.euclidean_distance(&center)).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    blend(image.get_pixel_mut(px, py), color, coverage as f32);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use territory_env::{DisabledRenderer, TileProvider};
    
    struct SolidRenderer;
    
    impl MapRenderer for SolidRenderer {
        fn render(
            &self,
            _boundary: &Polygon<f64>,
            frame: &MapFrame,
            _zoom: u8,
            _provider: &TileProvider,
        ) -> Result<RgbaImage, RenderError> {
            Ok(RgbaImage::from_pixel(frame.width_px, frame.height_px, Rgba([200, 200, 200, 255])))
        }
    }
    
    fn composer() -> MapComposer {
        MapComposer::new(MapConfig {
            dpi: 20,
            ..MapConfig::default()
        })
    }
    
    fn square() -> Polygon<f64> {
        polygon![(x: 0.0, y: 0.0), (x: 1000.0, y: 0.0), (x: 1000.0, y: 1000.0), (x: 0.0, y: 1000.0)]
    }
    
    #[test]
    fn test_basemap_gets_mask_and_outline() {
        let map = composer().compose(&SolidRenderer, &square(), Crs::WebMercator).unwrap();
        assert!(map.has_basemap());
        assert_eq!(map.image.dimensions(), (150, 120));
        
        let (w, h) = map.image.dimensions();
        let centre = map.image.get_pixel(w / 2, h / 2);
        assert_eq!(centre.0, [200, 200, 200, 255]);
        
        let corner = map.image.get_pixel(0, 0);
        assert_eq!(corner.0, [120, 120, 120, 255]);
        
        let left_edge = map.frame.to_pixel(Coord { x: 0.0, y: 500.0 });
        let stroke = map.image.get_pixel(left_edge.0 as u32, left_edge.1 as u32);
        assert!(stroke.0[0] > stroke.0[1] + 50);
    }
    
    #[test]
    fn test_render_failure_keeps_outline_without_mask() {
        let map = composer().compose(&DisabledRenderer, &square(), Crs::WebMercator).unwrap();
        assert!(matches!(map.render_error, Some(RenderError::Disabled)));
        assert_eq!(map.image.get_pixel(0, 0).0, [255, 255, 255, 255]);
        
        let left_edge = map.frame.to_pixel(Coord { x: 0.0, y: 500.0 });
        let stroke = map.image.get_pixel(left_edge.0 as u32, left_edge.1 as u32);
        assert_eq!(stroke.0[0], 255);
        assert!(stroke.0[1] < 200);
    }
    
    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.png");
        let map = composer().compose(&DisabledRenderer, &square(), Crs::WebMercator).unwrap();
        map.save_png(&path).unwrap();
        
        let (w, h) = image::image_dimensions(&path).unwrap();
        assert_eq!((w, h), (150, 120));
    }
}
