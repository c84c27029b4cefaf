//! Territory Report Environment Layer
//!
//! This crate holds the seams between the report pipeline and the
//! outside world, so the pipeline can run against real collaborators
//! in production and against stubs in tests.
//!
//! # Collaborators
//!
//! - **MapRenderer**: boundary frame → basemap raster (may fail on its own)
//! - **DocumentBuilder**: abstract document model → file on disk
//! - **EventSink**: outbound progress/log/status stream for a front end
//!
//! # Example
//!
//! ```ignore
//! use territory_env::{DocumentBuilder, PdfDocumentBuilder, ReportDocument};
//!
//! let builder = PdfDocumentBuilder::new();
//! let path = builder.build(&document, &out_dir.join("Maple-12.pdf"))?;
//! ```

mod builder;
mod crs;
mod document;
mod error;
mod events;
mod pdf_builder;
mod renderer;
mod tile_renderer;

pub use builder::{DocumentBuilder, JsonDocumentBuilder};
pub use crs::Crs;
pub use document::{
    Align, Block, FontWeight, ImageBlock, PageSpec, ReportDocument, Rgb, TableBlock, TableRow,
    TextBlock,
};
pub use error::{DocumentError, RenderError};
pub use events::{EventSink, RecordingSink, RunEvent, RunStatus};
pub use pdf_builder::PdfDocumentBuilder;
pub use renderer::{DisabledRenderer, MapFrame, MapRenderer, TileProvider};
pub use tile_renderer::TileMapRenderer;
