//! Error types for the collaborator layer.

use thiserror::Error;

/// Errors raised while producing a basemap raster.
///
/// None of these abort a run: the pipeline falls back to a
/// boundary-only map image.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Basemap rendering switched off by configuration
    #[error("Basemap rendering disabled")]
    Disabled,
    
    /// The frame is not in a coordinate system the tile source understands
    #[error("Unsupported coordinate system for tiles: {0}")]
    UnsupportedCrs(String),
    
    /// Frame has no area or no pixels
    #[error("Empty map frame")]
    EmptyFrame,
    
    /// Tile download failed
    #[error("Tile request failed for {url}: {reason}")]
    Http { url: String, reason: String },
    
    /// Tile bytes could not be decoded
    #[error("Tile decode error: {0}")]
    Decode(String),
}

impl RenderError {
    /// Creates an HTTP error for a tile URL.
    pub fn http(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Http {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while assembling or writing a report document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Map image could not be read or decoded
    #[error("Image error for {path}: {reason}")]
    Image { path: String, reason: String },
    
    /// PDF object construction failed
    #[error("PDF error: {0}")]
    Pdf(String),
    
    /// Document model serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    
    /// Writing the output file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocumentError {
    /// Creates an image error for a path.
    pub fn image(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::Image {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
