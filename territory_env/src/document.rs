//! Abstract report document model.
//!
//! The assembler produces this tree; a `DocumentBuilder` turns it into a
//! paginated file. All lengths are PDF points (1/72 inch).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// =============================================================================
// COLOURS
// =============================================================================

/// RGB colour with components in `0.0..=1.0`.
///
/// Serialized as a `#rrggbb` hex string.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);
    
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
    
    /// Uniform grey.
    pub const fn grey(level: f32) -> Self {
        Self::new(level, level, level)
    }
    
    /// Parses `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Result<Self, String> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Invalid colour: {}", hex));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map(|v| v as f32 / 255.0)
                .map_err(|e| e.to_string())
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }
    
    /// 8-bit channels for raster drawing.
    pub fn to_bytes(&self) -> [u8; 3] {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b)]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.to_bytes();
        write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;
    
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::from_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(rgb: Rgb) -> Self {
        rgb.to_string()
    }
}

// =============================================================================
// PAGE
// =============================================================================

/// Page size and margins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSpec {
    pub width: f32,
    pub height: f32,
    pub margin_left: f32,
    pub margin_right: f32,
    pub margin_top: f32,
    pub margin_bottom: f32,
}

impl PageSpec {
    /// US Letter with uniform margins.
    pub fn letter(margin: f32) -> Self {
        Self {
            width: 612.0,
            height: 792.0,
            margin_left: margin,
            margin_right: margin,
            margin_top: margin,
            margin_bottom: margin,
        }
    }
    
    /// Usable width between the side margins.
    pub fn content_width(&self) -> f32 {
        self.width - self.margin_left - self.margin_right
    }
    
    /// Usable height between the top and bottom margins.
    pub fn content_height(&self) -> f32 {
        self.height - self.margin_top - self.margin_bottom
    }
}

impl Default for PageSpec {
    fn default() -> Self {
        Self::letter(36.0)
    }
}

// =============================================================================
// BLOCKS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FontWeight {
    Regular,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Align {
    Left,
    Center,
}

/// A run of text laid out as a paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub weight: FontWeight,
    pub size: f32,
    pub align: Align,
    /// Vertical gap after the block
    pub space_after: f32,
}

impl TextBlock {
    /// Regular left-aligned text.
    pub fn plain(text: impl Into<String>, size: f32) -> Self {
        Self {
            text: text.into(),
            weight: FontWeight::Regular,
            size,
            align: Align::Left,
            space_after: 0.0,
        }
    }
}

/// A raster image drawn at a fixed size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub path: PathBuf,
    /// Intrinsic size of the raster
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Drawn size on the page
    pub width: f32,
    pub height: f32,
}

/// One row of the address table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableRow {
    /// Street-group header spanning every column
    Group { label: String, background: Rgb },
    
    /// Ordinary data row, one string per column
    Data { cells: Vec<String>, background: Rgb },
}

impl TableRow {
    pub fn is_group(&self) -> bool {
        matches!(self, TableRow::Group { .. })
    }
}

/// A table with a header row repeated on every page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBlock {
    pub column_widths: Vec<f32>,
    pub header: Vec<String>,
    pub header_background: Rgb,
    pub header_text: Rgb,
    pub grid: Rgb,
    pub font_size: f32,
    pub rows: Vec<TableRow>,
}

impl TableBlock {
    /// Number of data rows (group headers excluded).
    pub fn data_row_count(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_group()).count()
    }
}

/// Top-level document content, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Title(TextBlock),
    Paragraph(TextBlock),
    Image(ImageBlock),
    Spacer { height: f32 },
    Table(TableBlock),
}

/// A complete report ready for a `DocumentBuilder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub page: PageSpec,
    pub blocks: Vec<Block>,
}

impl ReportDocument {
    pub fn new(page: PageSpec) -> Self {
        Self {
            page,
            blocks: Vec::new(),
        }
    }
    
    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }
    
    /// The title text, if a title block exists.
    pub fn title(&self) -> Option<&str> {
        self.blocks.iter().find_map(|b| match b {
            Block::Title(t) => Some(t.text.as_str()),
            _ => None,
        })
    }
    
    /// The first table, if any.
    pub fn table(&self) -> Option<&TableBlock> {
        self.blocks.iter().find_map(|b| match b {
            Block::Table(t) => Some(t),
            _ => None,
        })
    }
    
    /// The first image, if any.
    pub fn image(&self) -> Option<&ImageBlock> {
        self.blocks.iter().find_map(|b| match b {
            Block::Image(i) => Some(i),
            _ => None,
        })
    }
    
    /// Texts of all paragraph blocks.
    pub fn paragraphs(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(p.text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    
    #[test]
    fn test_hex_colour() {
        let c = Rgb::from_hex("#40466e").unwrap();
        assert_relative_eq!(c.r, 64.0 / 255.0, epsilon = 1e-6);
        assert_eq!(c.to_string(), "#40466e");
        assert!(Rgb::from_hex("#12345").is_err());
        assert!(Rgb::from_hex("zzzzzz").is_err());
    }
    
    #[test]
    fn test_letter_content_box() {
        let page = PageSpec::letter(36.0);
        assert_relative_eq!(page.content_width(), 540.0);
        assert_relative_eq!(page.content_height(), 720.0);
    }
    
    #[test]
    fn test_data_row_count_skips_groups() {
        let table = TableBlock {
            column_widths: vec![1.0],
            header: vec!["Address".into()],
            header_background: Rgb::BLACK,
            header_text: Rgb::WHITE,
            grid: Rgb::BLACK,
            font_size: 8.0,
            rows: vec![
                TableRow::Group { label: "OAK ST".into(), background: Rgb::grey(0.92) },
                TableRow::Data { cells: vec!["1 Oak St".into()], background: Rgb::WHITE },
            ],
        };
        assert_eq!(table.data_row_count(), 1);
    }
}
