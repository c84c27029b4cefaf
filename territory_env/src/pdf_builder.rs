//! Production `DocumentBuilder` writing paginated PDF with `lopdf`.

use crate::builder::DocumentBuilder;
use crate::document::{Align, Block, FontWeight, ImageBlock, PageSpec, ReportDocument, Rgb, TableBlock, TableRow, TextBlock};
use crate::error::DocumentError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Average Helvetica advance as a fraction of the font size
const REGULAR_ADVANCE: f32 = 0.52;
const BOLD_ADVANCE: f32 = 0.56;

/// Line height as a multiple of the font size
const LEADING: f32 = 1.2;

/// Horizontal cell padding
const CELL_PAD_X: f32 = 4.0;

/// Writes `ReportDocument`s as PDF using the base-14 Helvetica faces.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfDocumentBuilder;

impl PdfDocumentBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentBuilder for PdfDocumentBuilder {
    fn extension(&self) -> &'static str {
        "pdf"
    }
    
    fn build(&self, document: &ReportDocument, path: &Path) -> Result<PathBuf, DocumentError> {
        let bytes = render_pdf(document)?;
        std::fs::write(path, bytes)?;
        Ok(path.to_path_buf())
    }
}

// =============================================================================
// TEXT HELPERS
// =============================================================================

fn font_name(weight: FontWeight) -> &'static str {
    match weight {
        FontWeight::Regular => "F1",
        FontWeight::Bold => "F2",
    }
}

fn text_width(text: &str, size: f32, weight: FontWeight) -> f32 {
    let advance = match weight {
        FontWeight::Regular => REGULAR_ADVANCE,
        FontWeight::Bold => BOLD_ADVANCE,
    };
    text.chars().count() as f32 * size * advance
}

/// Greedy word wrap; over-long words are split by character.
fn wrap(text: &str, size: f32, weight: FontWeight, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if text_width(&candidate, size, weight) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        for ch in word.chars() {
            current.push(ch);
            if text_width(&current, size, weight) > max_width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(ch);
            }
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// PDF literal string in WinAnsi; characters outside Latin-1 become `?`.
fn pdf_string(text: &str) -> Object {
    let bytes = text
        .chars()
        .map(|c| if (c as u32) < 256 { c as u32 as u8 } else { b'?' })
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

// =============================================================================
// PAGE LAYOUT
// =============================================================================

/// Flows blocks top to bottom, starting new pages as needed.
struct Layout {
    page: PageSpec,
    pages: Vec<Vec<Operation>>,
    y: f32,
}

impl Layout {
    fn new(page: PageSpec) -> Self {
        Self {
            page,
            pages: vec![Vec::new()],
            y: page.height - page.margin_top,
        }
    }
    
    fn ops(&mut self) -> &mut Vec<Operation> {
        // `pages` always holds at least one page.
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }
    
    fn remaining(&self) -> f32 {
        self.y - self.page.margin_bottom
    }
    
    fn page_is_empty(&self) -> bool {
        self.y >= self.page.height - self.page.margin_top
    }
    
    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = self.page.height - self.page.margin_top;
    }
    
    /// Starts a new page unless `height` fits or the page is still blank.
    fn ensure(&mut self, height: f32) -> bool {
        if height > self.remaining() && !self.page_is_empty() {
            self.new_page();
            return true;
        }
        false
    }
    
    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgb) {
        self.ops().extend([
            Operation::new("q", vec![]),
            Operation::new("rg", vec![color.r.into(), color.g.into(), color.b.into()]),
            Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]),
            Operation::new("f", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }
    
    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, width: f32, color: Rgb) {
        self.ops().extend([
            Operation::new("q", vec![]),
            Operation::new("w", vec![width.into()]),
            Operation::new("RG", vec![color.r.into(), color.g.into(), color.b.into()]),
            Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]),
            Operation::new("S", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }
    
    fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, width: f32, color: Rgb) {
        self.ops().extend([
            Operation::new("q", vec![]),
            Operation::new("w", vec![width.into()]),
            Operation::new("RG", vec![color.r.into(), color.g.into(), color.b.into()]),
            Operation::new("m", vec![x1.into(), y1.into()]),
            Operation::new("l", vec![x2.into(), y2.into()]),
            Operation::new("S", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }
    
    fn text(&mut self, x: f32, baseline: f32, text: &str, size: f32, weight: FontWeight, color: Rgb) {
        self.ops().extend([
            Operation::new("BT", vec![]),
            Operation::new("rg", vec![color.r.into(), color.g.into(), color.b.into()]),
            Operation::new("Tf", vec![font_name(weight).into(), size.into()]),
            Operation::new("Td", vec![x.into(), baseline.into()]),
            Operation::new("Tj", vec![pdf_string(text)]),
            Operation::new("ET", vec![]),
        ]);
    }
    
    fn paragraph(&mut self, block: &TextBlock) {
        let width = self.page.content_width();
        let line_height = block.size * LEADING;
        
        for line in wrap(&block.text, block.size, block.weight, width) {
            self.ensure(line_height);
            let x = match block.align {
                Align::Left => self.page.margin_left,
                Align::Center => {
                    let w = text_width(&line, block.size, block.weight);
                    self.page.margin_left + ((width - w) / 2.0).max(0.0)
                }
            };
            let baseline = self.y - block.size;
            self.text(x, baseline, &line, block.size, block.weight, Rgb::BLACK);
            self.y -= line_height;
        }
        self.y -= block.space_after;
    }
    
    fn image(&mut self, block: &ImageBlock, name: &str) {
        self.ensure(block.height);
        let x = self.page.margin_left + ((self.page.content_width() - block.width) / 2.0).max(0.0);
        let y = self.y - block.height;
        self.ops().extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![block.width.into(), 0.into(), 0.into(), block.height.into(), x.into(), y.into()],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]);
        self.y = y;
    }
    
    fn spacer(&mut self, height: f32) {
        if height >= self.remaining() {
            self.new_page();
        } else {
            self.y -= height;
        }
    }
    
    fn table(&mut self, table: &TableBlock) {
        let total: f32 = table.column_widths.iter().sum();
        let x0 = self.page.margin_left + ((self.page.content_width() - total) / 2.0).max(0.0);
        let size = table.font_size;
        let leading = size * LEADING;
        
        self.ensure(header_height(table) + leading + 8.0);
        self.table_header(table, x0, total);
        
        for row in &table.rows {
            let (lines, pad_top, pad_bottom, weight) = match row {
                TableRow::Group { label, .. } => (
                    vec![wrap(label, size, FontWeight::Bold, total - 2.0 * CELL_PAD_X)],
                    5.0,
                    3.0,
                    FontWeight::Bold,
                ),
                TableRow::Data { cells, .. } => (
                    cells
                        .iter()
                        .zip(&table.column_widths)
                        .map(|(cell, w)| wrap(cell, size, FontWeight::Regular, w - 2.0 * CELL_PAD_X))
                        .collect(),
                    4.0,
                    4.0,
                    FontWeight::Regular,
                ),
            };
            let line_count = lines.iter().map(Vec::len).max().unwrap_or(1).max(1);
            let height = pad_top + line_count as f32 * leading + pad_bottom;
            
            if self.ensure(height) {
                self.table_header(table, x0, total);
            }
            
            let top = self.y;
            let bottom = top - height;
            let background = match row {
                TableRow::Group { background, .. } | TableRow::Data { background, .. } => *background,
            };
            self.fill_rect(x0, bottom, total, height, background);
            
            match row {
                TableRow::Group { .. } => {
                    for (i, line) in lines[0].iter().enumerate() {
                        let baseline = top - pad_top - size - i as f32 * leading;
                        self.text(x0 + CELL_PAD_X, baseline, line, size, weight, Rgb::BLACK);
                    }
                    self.stroke_rect(x0, bottom, total, height, 0.25, table.grid);
                    self.line(x0, bottom, x0 + total, bottom, 0.5, Rgb::grey(0.5));
                }
                TableRow::Data { .. } => {
                    let mut x = x0;
                    for (cell_lines, w) in lines.iter().zip(&table.column_widths) {
                        for (i, line) in cell_lines.iter().enumerate() {
                            let baseline = top - pad_top - size - i as f32 * leading;
                            self.text(x + CELL_PAD_X, baseline, line, size, weight, Rgb::BLACK);
                        }
                        self.stroke_rect(x, bottom, *w, height, 0.25, table.grid);
                        x += w;
                    }
                }
            }
            self.y = bottom;
        }
    }
    
    fn table_header(&mut self, table: &TableBlock, x0: f32, total: f32) {
        let size = table.font_size;
        let height = header_height(table);
        let top = self.y;
        let bottom = top - height;
        
        self.fill_rect(x0, bottom, total, height, table.header_background);
        let mut x = x0;
        for (label, w) in table.header.iter().zip(&table.column_widths) {
            self.text(x + CELL_PAD_X, top - 3.0 - size, label, size, FontWeight::Bold, table.header_text);
            self.stroke_rect(x, bottom, *w, height, 0.25, table.grid);
            x += w;
        }
        self.line(x0, bottom, x0 + total, bottom, 1.0, Rgb::BLACK);
        self.y = bottom;
    }
}

fn header_height(table: &TableBlock) -> f32 {
    3.0 + table.font_size * LEADING + 6.0
}

// =============================================================================
// OBJECT ASSEMBLY
// =============================================================================

fn image_xobject(doc: &mut Document, block: &ImageBlock) -> Result<ObjectId, DocumentError> {
    let rgb = image::open(&block.path)
        .map_err(|e| DocumentError::image(&block.path, e))?
        .to_rgb8();
    
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(rgb.as_raw())?;
    let data = encoder.finish()?;
    
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => rgb.width() as i64,
        "Height" => rgb.height() as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    Ok(doc.add_object(Stream::new(dict, data)))
}

fn render_pdf(document: &ReportDocument) -> Result<Vec<u8>, DocumentError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    
    let mut xobjects = Dictionary::new();
    let mut layout = Layout::new(document.page);
    let mut image_count = 0;
    
    for block in &document.blocks {
        match block {
            Block::Title(text) | Block::Paragraph(text) => layout.paragraph(text),
            Block::Image(image) => {
                let name = format!("Im{}", image_count);
                image_count += 1;
                let id = image_xobject(&mut doc, image)?;
                xobjects.set(name.as_bytes().to_vec(), Object::Reference(id));
                layout.image(image, &name);
            }
            Block::Spacer { height } => layout.spacer(*height),
            Block::Table(table) => layout.table(table),
        }
    }
    
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
        "XObject" => xobjects,
    });
    
    let mut kids = Vec::with_capacity(layout.pages.len());
    for operations in std::mem::take(&mut layout.pages) {
        let content = Content { operations };
        let encoded = content.encode().map_err(|e| DocumentError::Pdf(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    debug!("Laid out {} page(s)", kids.len());
    
    let page = document.page;
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), page.width.into(), page.height.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| DocumentError::Pdf(e.to_string()))?;
    Ok(output)
}
