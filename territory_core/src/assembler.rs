//! Builds the abstract report document for one territory.

use crate::config::LayoutConfig;
use crate::formatter::StreetGroup;
use std::path::{Path, PathBuf};
use territory_env::{
    Align, Block, DocumentError, FontWeight, ImageBlock, ReportDocument, TableBlock, TableRow,
    TextBlock,
};
use tracing::warn;

pub const MAP_NOT_FOUND: &str = "Map image file not found.";
pub const MAP_ERROR: &str = "Map image error.";
pub const NO_ADDRESSES: &str = "No addresses in territory.";
pub const NO_ADDRESS_DATA: &str = "No address data available for this territory.";

/// Address table header labels
pub const TABLE_HEADER: [&str; 3] = ["Address", "Unit", "City, State Zip"];

/// Font size of the attribution caption
const CAPTION_SIZE: f32 = 6.0;

/// Placeholder for an empty table cell
const EMPTY_CELL: &str = "-";

/// What the table section of a report shows.
#[derive(Debug, Clone, Copy)]
pub enum TableContent<'a> {
    /// No address source was provided at all
    NoData,
    /// Sorted street groups; may be empty
    Groups(&'a [StreetGroup]),
}

/// A map raster on disk plus its optional credit line.
#[derive(Debug, Clone)]
pub struct MapImage {
    pub path: PathBuf,
    pub attribution: Option<String>,
}

/// An assembled document and the image problem it recovered from, if any.
#[derive(Debug)]
pub struct AssembledReport {
    pub document: ReportDocument,
    pub image_error: Option<DocumentError>,
}

/// Lays out title, map and address table.
#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    layout: LayoutConfig,
}

impl DocumentAssembler {
    pub fn new(layout: LayoutConfig) -> Self {
        Self { layout }
    }
    
    /// Assembles a report. Never fails: image problems become placeholder text.
    pub fn assemble(&self, title: &str, map: Option<&MapImage>, table: TableContent<'_>) -> AssembledReport {
        let mut document = ReportDocument::new(self.layout.page);
        document.push(Block::Title(TextBlock {
            text: title.to_string(),
            weight: FontWeight::Bold,
            size: self.layout.title_size,
            align: Align::Center,
            space_after: self.layout.title_space_after,
        }));
        
        let image_error = match map.filter(|m| m.path.exists()) {
            None => {
                document.push(self.paragraph(MAP_NOT_FOUND));
                None
            }
            Some(map) => match self.image_block(&map.path, map.attribution.is_some()) {
                Ok(block) => {
                    document.push(Block::Image(block));
                    if let Some(attribution) = &map.attribution {
                        document.push(Block::Paragraph(TextBlock {
                            align: Align::Center,
                            ..TextBlock::plain(attribution.clone(), CAPTION_SIZE)
                        }));
                    }
                    document.push(Block::Spacer {
                        height: self.layout.image_space_after,
                    });
                    None
                }
                Err(e) => {
                    warn!("{}", e);
                    document.push(self.paragraph(MAP_ERROR));
                    Some(e)
                }
            },
        };
        
        match table {
            TableContent::NoData => document.push(self.paragraph(NO_ADDRESS_DATA)),
            TableContent::Groups(groups) if groups.iter().all(|g| g.rows.is_empty()) => {
                document.push(self.paragraph(NO_ADDRESSES))
            }
            TableContent::Groups(groups) => document.push(Block::Table(self.table(groups))),
        }
        
        AssembledReport {
            document,
            image_error,
        }
    }
    
    fn paragraph(&self, text: &str) -> Block {
        Block::Paragraph(TextBlock::plain(text, self.layout.body_size))
    }
    
    /// Sizes the map to the content width, capped to the space left under
    /// the title, keeping its aspect ratio.
    fn image_block(&self, path: &Path, captioned: bool) -> Result<ImageBlock, DocumentError> {
        // Full decode: a readable header alone does not make an embeddable image.
        let decoded = image::open(path).map_err(|e| DocumentError::image(path, e))?;
        let (pixel_width, pixel_height) = (decoded.width(), decoded.height());
        let aspect = if pixel_width > 0 {
            pixel_height as f32 / pixel_width as f32
        } else {
            1.0
        };
        
        let page = &self.layout.page;
        let mut reserved =
            self.layout.title_size + self.layout.title_space_after + self.layout.image_space_after;
        if captioned {
            reserved += CAPTION_SIZE * 1.2;
        }
        let max_height = page.content_height() - reserved;
        
        let mut width = page.content_width();
        let mut height = width * aspect;
        if height > max_height {
            height = max_height;
            width = if aspect > 0.0 { height / aspect } else { page.content_width() };
        }
        
        Ok(ImageBlock {
            path: path.to_path_buf(),
            pixel_width,
            pixel_height,
            width,
            height,
        })
    }
    
    fn table(&self, groups: &[StreetGroup]) -> TableBlock {
        let content_width = self.layout.page.content_width();
        let mut rows = Vec::new();
        
        for group in groups {
            rows.push(TableRow::Group {
                label: group.street.clone(),
                background: self.layout.group_background,
            });
            for (i, row) in group.rows.iter().enumerate() {
                let cell = |s: &str| if s.is_empty() { EMPTY_CELL } else { s }.to_string();
                rows.push(TableRow::Data {
                    cells: vec![cell(&row.address), cell(&row.unit), cell(&row.locality)],
                    background: if i % 2 == 0 {
                        self.layout.zebra_even
                    } else {
                        self.layout.zebra_odd
                    },
                });
            }
        }
        
        TableBlock {
            column_widths: self
                .layout
                .column_fractions
                .iter()
                .map(|f| f * content_width)
                .collect(),
            header: TABLE_HEADER.iter().map(|h| h.to_string()).collect(),
            header_background: self.layout.header_background,
            header_text: self.layout.header_text,
            grid: self.layout.grid,
            font_size: self.layout.body_size,
            rows,
        }
    }
}
