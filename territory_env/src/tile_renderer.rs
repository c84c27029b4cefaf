//! Production `MapRenderer` backed by an XYZ tile server.

use crate::crs::Crs;
use crate::error::RenderError;
use crate::renderer::{MapFrame, MapRenderer, TileProvider};
use geo::Polygon;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::f64::consts::PI;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Spherical Mercator radius (metres)
const EARTH_RADIUS: f64 = 6378137.0;

/// Half the Web Mercator world width (metres)
const ORIGIN_SHIFT: f64 = PI * EARTH_RADIUS;

/// Range of tiles covering a frame at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TileWindow {
    zoom: u8,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    /// Frame corners in global pixel space at `zoom`
    px_min: f64,
    py_min: f64,
    px_max: f64,
    py_max: f64,
}

impl TileWindow {
    fn covering(frame: &MapFrame, zoom: u8, tile_size: u32) -> Self {
        let world_px = tile_size as f64 * 2f64.powi(zoom as i32);
        let to_px = |x: f64| (x + ORIGIN_SHIFT) / (2.0 * ORIGIN_SHIFT) * world_px;
        let to_py = |y: f64| (ORIGIN_SHIFT - y) / (2.0 * ORIGIN_SHIFT) * world_px;
        
        let px_min = to_px(frame.extent.min().x).clamp(0.0, world_px);
        let px_max = to_px(frame.extent.max().x).clamp(0.0, world_px);
        let py_min = to_py(frame.extent.max().y).clamp(0.0, world_px);
        let py_max = to_py(frame.extent.min().y).clamp(0.0, world_px);
        
        let last = (world_px / tile_size as f64) as u32 - 1;
        let tile = |p: f64| ((p / tile_size as f64).floor() as u32).min(last);
        
        Self {
            zoom,
            x0: tile(px_min),
            y0: tile(py_min),
            x1: tile((px_max - 1e-9).max(px_min)),
            y1: tile((py_max - 1e-9).max(py_min)),
            px_min,
            py_min,
            px_max,
            py_max,
        }
    }
    
    fn columns(&self) -> u32 {
        self.x1 - self.x0 + 1
    }
    
    fn rows(&self) -> u32 {
        self.y1 - self.y0 + 1
    }
    
    fn tile_count(&self) -> u64 {
        self.columns() as u64 * self.rows() as u64
    }
}

/// Fetches, stitches and resamples map tiles for a frame.
///
/// Zoom is lowered step by step until the frame needs at most
/// `max_tiles` tiles.
///
/// The blocking HTTP client is built on first use, from the thread that
/// renders. Constructing the renderer never touches the network stack, so
/// it is safe inside an async context.
pub struct TileMapRenderer {
    user_agent: String,
    client: OnceLock<Result<reqwest::blocking::Client, String>>,
    max_tiles: u32,
}

impl TileMapRenderer {
    pub fn new(user_agent: &str, max_tiles: u32) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            client: OnceLock::new(),
            max_tiles: max_tiles.max(1),
        }
    }
    
    fn client(&self) -> Result<&reqwest::blocking::Client, RenderError> {
        self.client
            .get_or_init(|| {
                reqwest::blocking::Client::builder()
                    .user_agent(self.user_agent.clone())
                    .timeout(Duration::from_secs(30))
                    .build()
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| RenderError::http("<client>", e))
    }
    
    fn choose_window(&self, frame: &MapFrame, zoom: u8, tile_size: u32) -> TileWindow {
        let mut z = zoom;
        loop {
            let window = TileWindow::covering(frame, z, tile_size);
            if window.tile_count() <= self.max_tiles as u64 || z == 0 {
                return window;
            }
            z -= 1;
        }
    }
    
    fn fetch_tile(&self, provider: &TileProvider, z: u8, x: u32, y: u32) -> Result<RgbaImage, RenderError> {
        let url = provider.tile_url(z, x, y);
        let response = self
            .client()?
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| RenderError::http(&url, e))?;
        let bytes = response.bytes().map_err(|e| RenderError::http(&url, e))?;
        let tile = image::load_from_memory(&bytes)
            .map_err(|e| RenderError::Decode(format!("{}: {}", url, e)))?;
        Ok(tile.to_rgba8())
    }
}

impl MapRenderer for TileMapRenderer {
    fn render(
        &self,
        _boundary: &Polygon<f64>,
        frame: &MapFrame,
        zoom: u8,
        provider: &TileProvider,
    ) -> Result<RgbaImage, RenderError> {
        if frame.crs != Crs::WebMercator {
            return Err(RenderError::UnsupportedCrs(frame.crs.to_string()));
        }
        if frame.width_px == 0 || frame.height_px == 0 {
            return Err(RenderError::EmptyFrame);
        }
        
        let tile_size = provider.tile_size.max(1);
        let window = self.choose_window(frame, zoom, tile_size);
        if window.zoom != zoom {
            info!(
                "Lowered zoom {} -> {} to stay within {} tiles",
                zoom, window.zoom, self.max_tiles
            );
        }
        debug!(
            "Fetching {}x{} tiles from {} at z{}",
            window.columns(),
            window.rows(),
            provider.name,
            window.zoom
        );
        
        let mut mosaic = RgbaImage::new(window.columns() * tile_size, window.rows() * tile_size);
        for ty in window.y0..=window.y1 {
            for tx in window.x0..=window.x1 {
                let tile = self.fetch_tile(provider, window.zoom, tx, ty)?;
                let tile = if tile.width() != tile_size || tile.height() != tile_size {
                    imageops::resize(&tile, tile_size, tile_size, FilterType::Triangle)
                } else {
                    tile
                };
                imageops::overlay(
                    &mut mosaic,
                    &tile,
                    ((tx - window.x0) * tile_size) as i64,
                    ((ty - window.y0) * tile_size) as i64,
                );
            }
        }
        
        let crop_x = (window.px_min - window.x0 as f64 * tile_size as f64).floor().max(0.0) as u32;
        let crop_y = (window.py_min - window.y0 as f64 * tile_size as f64).floor().max(0.0) as u32;
        let crop_w = ((window.px_max - window.px_min).ceil() as u32)
            .clamp(1, mosaic.width().saturating_sub(crop_x).max(1));
        let crop_h = ((window.py_max - window.py_min).ceil() as u32)
            .clamp(1, mosaic.height().saturating_sub(crop_y).max(1));
        
        let cropped = imageops::crop_imm(&mosaic, crop_x, crop_y, crop_w, crop_h).to_image();
        Ok(imageops::resize(
            &cropped,
            frame.width_px,
            frame.height_px,
            FilterType::CatmullRom,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord, Rect};
    
    fn frame_around(cx: f64, cy: f64, half: f64) -> MapFrame {
        MapFrame {
            extent: Rect::new(
                Coord { x: cx - half, y: cy - half },
                Coord { x: cx + half, y: cy + half },
            ),
            crs: Crs::WebMercator,
            width_px: 512,
            height_px: 512,
        }
    }
    
    #[test]
    fn test_window_at_world_origin() {
        // A tiny frame at (0, 0) sits at the corner of the four central tiles.
        let window = TileWindow::covering(&frame_around(0.0, 0.0, 10.0), 1, 256);
        assert_eq!((window.x0, window.x1), (0, 1));
        assert_eq!((window.y0, window.y1), (0, 1));
        assert_eq!(window.tile_count(), 4);
    }
    
    #[test]
    fn test_world_frame_tile_count_at_max_zoom() {
        let world = frame_around(0.0, 0.0, ORIGIN_SHIFT);
        let window = TileWindow::covering(&world, 18, 256);
        assert_eq!(window.tile_count(), 262_144u64 * 262_144);
    }
    
    #[test]
    fn test_zoom_lowered_to_fit_budget() {
        let renderer = TileMapRenderer::new("test", 4);
        // A 20 km frame needs many z18 tiles.
        let frame = frame_around(-13_600_000.0, 4_500_000.0, 10_000.0);
        let window = renderer.choose_window(&frame, 18, 256);
        
        assert!(window.zoom < 18);
        assert!(window.tile_count() <= 4);
    }
    
    #[test]
    fn test_client_is_not_built_until_first_fetch() {
        let renderer = TileMapRenderer::new("test", 4);
        assert!(renderer.client.get().is_none());
    }
    
    #[test]
    fn test_rejects_geographic_frame() {
        let renderer = TileMapRenderer::new("test", 4);
        let mut frame = frame_around(0.0, 0.0, 1.0);
        frame.crs = Crs::Wgs84;
        let boundary = geo::polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        
        let result = renderer.render(&boundary, &frame, 18, &TileProvider::default());
        assert!(matches!(result, Err(RenderError::UnsupportedCrs(_))));
    }
}
