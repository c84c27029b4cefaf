//! Document output seam.

use crate::document::ReportDocument;
use crate::error::DocumentError;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persists a report document to a file.
pub trait DocumentBuilder: Send + Sync {
    /// File extension of the produced documents (without the dot).
    fn extension(&self) -> &'static str;
    
    /// Writes `document` to `path` and returns the written path.
    fn build(&self, document: &ReportDocument, path: &Path) -> Result<PathBuf, DocumentError>;
}

/// Writes the document model as pretty-printed JSON.
///
/// Useful for inspecting reports without a PDF viewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentBuilder;

impl DocumentBuilder for JsonDocumentBuilder {
    fn extension(&self) -> &'static str {
        "json"
    }
    
    fn build(&self, document: &ReportDocument, path: &Path) -> Result<PathBuf, DocumentError> {
        let json = serde_json::to_string_pretty(document)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(path.to_path_buf())
    }
}
