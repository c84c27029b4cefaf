//! Territory table loading and per-row territory construction.

use crate::config::{ColumnRef, CrsConfig, TableSchema};
use crate::geometry::{self, GeometryError};
use crate::projection::Reproject;
use csv::{ReaderBuilder, StringRecord};
use geo::{Coord, LineString, Polygon};
use std::io;
use std::path::Path;
use territory_env::Crs;
use thiserror::Error;
use tracing::{debug, info};

/// Number used when a territory has none
pub const NO_NUMBER: &str = "NoNum";

// =============================================================================
// ERRORS
// =============================================================================

/// Run-scoped input failures. Any of these aborts a run before the loop.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Cannot open territory table {path}: {source}")]
    Open { path: String, source: csv::Error },
    
    #[error("Territory table {path} has {found} columns, need at least {required}")]
    ColumnMismatch {
        path: String,
        found: usize,
        required: usize,
    },
    
    #[error("Territory table {path} has no column named '{column}'")]
    MissingColumn { path: String, column: String },
    
    #[error("Cannot read territory table {path}: {source}")]
    Csv { path: String, source: csv::Error },
    
    #[error("Cannot create output directory {path}: {source}")]
    OutputDir { path: String, source: io::Error },
}

/// Row-scoped failures. The row is skipped.
#[derive(Debug, Error)]
pub enum TerritoryError {
    #[error("Row {row}: missing territory name")]
    MissingName { row: usize },
    
    #[error("Row {row}: missing or empty boundary")]
    BlankBoundary { row: usize },
    
    #[error("Geometry error for {name}: {source}")]
    Geometry {
        name: String,
        #[source]
        source: GeometryError,
    },
}

// =============================================================================
// TABLE
// =============================================================================

/// The three logical fields of one table row, missing tokens already removed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TerritoryRow {
    /// Zero-based data row index
    pub index: usize,
    pub name: Option<String>,
    pub number: Option<String>,
    pub boundary: Option<String>,
}

/// A territory table read fully into memory.
#[derive(Debug, Clone)]
pub struct TerritoryTable {
    pub origin: String,
    pub rows: Vec<TerritoryRow>,
}

impl TerritoryTable {
    /// Opens a CSV file and resolves the schema against its header.
    pub fn open(path: &Path, schema: &TableSchema) -> Result<Self, InputError> {
        let origin = path.display().to_string();
        info!("Loading territory table {}", origin);
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|source| InputError::Open {
                path: origin.clone(),
                source,
            })?;
        Self::from_csv(reader, schema, origin)
    }
    
    /// Reads CSV text from any reader.
    pub fn from_reader<R: io::Read>(
        reader: R,
        schema: &TableSchema,
        origin: &str,
    ) -> Result<Self, InputError> {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        Self::from_csv(reader, schema, origin.to_string())
    }
    
    fn from_csv<R: io::Read>(
        mut reader: csv::Reader<R>,
        schema: &TableSchema,
        origin: String,
    ) -> Result<Self, InputError> {
        let csv_error = |source| InputError::Csv {
            path: origin.clone(),
            source,
        };
        let headers = reader.headers().map_err(csv_error)?.clone();
        
        let name = resolve_column(&schema.name, &headers, &origin)?;
        let number = resolve_column(&schema.number, &headers, &origin)?;
        let boundary = resolve_column(&schema.boundary, &headers, &origin)?;
        let highest = name.max(number).max(boundary);
        if headers.len() <= highest {
            return Err(InputError::ColumnMismatch {
                path: origin,
                found: headers.len(),
                required: highest + 1,
            });
        }
        
        let field = |record: &StringRecord, column: usize| {
            record
                .get(column)
                .filter(|v| !schema.is_missing(v))
                .map(|v| v.to_string())
        };
        
        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.map_err(csv_error)?;
            rows.push(TerritoryRow {
                index,
                name: field(&record, name),
                number: field(&record, number),
                boundary: field(&record, boundary),
            });
        }
        
        info!("Loaded {} rows from {}", rows.len(), origin);
        Ok(Self { origin, rows })
    }
    
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn resolve_column(column: &ColumnRef, headers: &StringRecord, origin: &str) -> Result<usize, InputError> {
    match column {
        ColumnRef::Index(i) => Ok(*i),
        ColumnRef::Header(name) => headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| InputError::MissingColumn {
                path: origin.to_string(),
                column: name.clone(),
            }),
    }
}

// =============================================================================
// FIELD NORMALIZATION
// =============================================================================

/// Normalizes a territory number.
///
/// Missing → `NoNum`; anything parsing as a finite float → its truncated
/// integer text; otherwise the trimmed raw text.
pub fn normalize_number(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return NO_NUMBER.to_string();
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => format!("{:.0}", value.trunc() + 0.0),
        _ => raw.to_string(),
    }
}

/// Rewrites every numeric token into a JSON number.
fn normalize_numbers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')) {
            out.push(c);
            continue;
        }
        let mut token = String::from(c);
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || matches!(next, '.' | '_' | 'e' | 'E' | '+' | '-') {
                token.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if token.chars().any(|c| c.is_ascii_digit()) {
            out.push_str(&normalize_number_token(&token));
        } else {
            out.push_str(&token);
        }
    }
    out
}

fn normalize_number_token(token: &str) -> String {
    let token: String = token.chars().filter(|c| *c != '_').collect();
    let (sign, rest) = match token.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", token.strip_prefix('+').unwrap_or(&token)),
    };
    let (mantissa, exponent) = match rest.find(|c| c == 'e' || c == 'E') {
        Some(at) => rest.split_at(at),
        None => (rest, ""),
    };
    let (integer, fraction) = match mantissa.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (mantissa, None),
    };
    
    let integer = integer.trim_start_matches('0');
    let mut number = format!("{}{}", sign, if integer.is_empty() { "0" } else { integer });
    if let Some(fraction) = fraction {
        number.push('.');
        number.push_str(if fraction.is_empty() { "0" } else { fraction });
    }
    number.push_str(exponent);
    number
}

/// Parses a boundary literal such as `[[-89.6, 39.7], [-89.5, 39.7], ...]`.
///
/// Round brackets are treated as square ones and trailing commas are
/// dropped. Numbers may use `.5`, `1.`, `+2`, `007` and `1_000` spellings.
/// Ordinates beyond the first two are ignored.
pub fn parse_boundary(literal: &str) -> Result<Polygon<f64>, GeometryError> {
    let mut json = String::with_capacity(literal.len());
    for c in literal.trim().chars() {
        match c {
            '(' => json.push('['),
            ')' | ']' => {
                let kept = json.trim_end().len();
                json.truncate(kept);
                if json.ends_with(',') {
                    json.pop();
                }
                json.push(']');
            }
            _ => json.push(c),
        }
    }
    
    let json = normalize_numbers(&json);
    let raw: Vec<Vec<f64>> =
        serde_json::from_str(&json).map_err(|e| GeometryError::Parse(e.to_string()))?;
    
    let mut coords = Vec::with_capacity(raw.len());
    for (i, vertex) in raw.iter().enumerate() {
        match vertex.as_slice() {
            [x, y, ..] => coords.push(Coord { x: *x, y: *y }),
            _ => {
                return Err(GeometryError::Parse(format!(
                    "vertex {} has {} ordinates",
                    i,
                    vertex.len()
                )))
            }
        }
    }
    
    let open_len = if coords.len() > 1 && coords.first() == coords.last() {
        coords.len() - 1
    } else {
        coords.len()
    };
    if open_len < 3 {
        return Err(GeometryError::TooFewVertices(open_len));
    }
    Ok(Polygon::new(LineString::from(coords), vec![]))
}

/// Keeps alphanumerics and `keep`; everything else becomes `_`. Trailing
/// whitespace is trimmed.
fn sanitize(text: &str, keep: &[char]) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() || keep.contains(&c) { c } else { '_' })
        .collect();
    cleaned.trim_end().to_string()
}

// =============================================================================
// TERRITORY
// =============================================================================

/// One territory, in source and working coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Territory {
    /// Zero-based table row index
    pub row: usize,
    pub name: String,
    pub number: String,
    
    /// Boundary in source coordinates
    pub boundary: Polygon<f64>,
    pub crs: Crs,
    
    /// Boundary in the working CRS, used for every spatial operation
    pub projected: Polygon<f64>,
    pub working_crs: Crs,
    
    /// Whether the source boundary needed repair
    pub repaired: bool,
}

impl Territory {
    /// Document title.
    pub fn title(&self) -> String {
        format!("{} - {}", self.name, self.number)
    }
    
    /// `{name}-{number}` made safe for a file name.
    pub fn file_stem(&self) -> String {
        let mut name = sanitize(&self.name, &[' ', '-', '_']);
        if name.is_empty() {
            name = format!("Territory_Row_{}", self.row);
        }
        let mut number = sanitize(&self.number, &['-', '_']);
        if number.is_empty() {
            number = NO_NUMBER.to_string();
        }
        format!("{}-{}", name, number)
    }
    
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.file_stem(), extension)
    }
}

/// Builds territories from table rows.
#[derive(Debug, Clone, Copy)]
pub struct TerritoryLoader {
    crs: CrsConfig,
}

impl TerritoryLoader {
    pub fn new(crs: CrsConfig) -> Self {
        Self { crs }
    }
    
    /// Validates one row and eagerly projects its boundary.
    pub fn parse(&self, row: &TerritoryRow) -> Result<Territory, TerritoryError> {
        let name = row
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(TerritoryError::MissingName { row: row.index })?
            .to_string();
        let literal = row
            .boundary
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(TerritoryError::BlankBoundary { row: row.index })?;
        let number = normalize_number(row.number.as_deref());
        
        let geometry_error = |source| TerritoryError::Geometry {
            name: name.clone(),
            source,
        };
        
        let polygon = parse_boundary(literal).map_err(geometry_error)?;
        let (boundary, repaired) = geometry::make_valid(polygon)
            .map_err(|reason| geometry_error(GeometryError::Invalid(reason)))?;
        if repaired {
            debug!("Repaired boundary of {}", name);
        }
        
        let projected = boundary
            .reproject(self.crs.source, self.crs.working)
            .map_err(|e| geometry_error(GeometryError::Projection(e)))?;
        geometry::check(&projected)
            .map_err(|reason| geometry_error(GeometryError::InvalidAfterProjection(reason)))?;
        
        Ok(Territory {
            row: row.index,
            name,
            number,
            boundary,
            crs: self.crs.source,
            projected,
            working_crs: self.crs.working,
            repaired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;
    use std::io::Write;
    
    const SQUARE: &str = "[[-89.7, 39.7], [-89.6, 39.7], [-89.6, 39.8], [-89.7, 39.8]]";
    
    fn row(name: Option<&str>, number: Option<&str>, boundary: Option<&str>) -> TerritoryRow {
        TerritoryRow {
            index: 4,
            name: name.map(String::from),
            number: number.map(String::from),
            boundary: boundary.map(String::from),
        }
    }
    
    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number(None), "NoNum");
        assert_eq!(normalize_number(Some("  ")), "NoNum");
        assert_eq!(normalize_number(Some("12")), "12");
        assert_eq!(normalize_number(Some("12.0")), "12");
        assert_eq!(normalize_number(Some("7.9")), "7");
        assert_eq!(normalize_number(Some("-0.5")), "0");
        assert_eq!(normalize_number(Some(" 12B ")), "12B");
    }
    
    #[test]
    fn test_parse_boundary_variants() {
        let square = parse_boundary(SQUARE).unwrap();
        assert_eq!(square.exterior().0.len(), 5);
        
        let tuples = parse_boundary("((0, 0, 5), (1, 0, 5), (1, 1, 5),)").unwrap();
        assert_relative_eq!(tuples.unsigned_area(), 0.5);
    }
    
    #[test]
    fn test_parse_boundary_loose_numbers() {
        let polygon = parse_boundary("[(.5, 1.), (1_000, +2), (3, 4e0), (-.25, 007)]").unwrap();
        let coords: Vec<(f64, f64)> = polygon.exterior().0.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(
            coords,
            vec![(0.5, 1.0), (1000.0, 2.0), (3.0, 4.0), (-0.25, 7.0), (0.5, 1.0)]
        );
        assert_eq!(normalize_number_token("-0_1.e+2"), "-1.0e+2");
    }
    
    #[test]
    fn test_parse_boundary_errors() {
        assert!(matches!(parse_boundary("[[0, 0], [1, 0"), Err(GeometryError::Parse(_))));
        assert!(matches!(parse_boundary("not a list"), Err(GeometryError::Parse(_))));
        assert!(matches!(parse_boundary("[[0], [1, 0], [1, 1]]"), Err(GeometryError::Parse(_))));
        assert_eq!(
            parse_boundary("[[0, 0], [1, 0], [0, 0]]"),
            Err(GeometryError::TooFewVertices(2))
        );
    }
    
    #[test]
    fn test_loader_projects_and_titles() {
        let loader = TerritoryLoader::new(CrsConfig::default());
        let territory = loader.parse(&row(Some(" North "), Some("3.0"), Some(SQUARE))).unwrap();
        
        assert_eq!(territory.title(), "North - 3");
        assert_eq!(territory.crs, Crs::Wgs84);
        assert_eq!(territory.working_crs, Crs::WebMercator);
        assert!(territory.projected.exterior().0[0].x < -9_900_000.0);
        assert!(!territory.repaired);
    }
    
    #[test]
    fn test_loader_rejects_rows() {
        let loader = TerritoryLoader::new(CrsConfig::default());
        assert!(matches!(
            loader.parse(&row(None, Some("1"), Some(SQUARE))),
            Err(TerritoryError::MissingName { row: 4 })
        ));
        assert!(matches!(
            loader.parse(&row(Some("A"), Some("1"), Some("  "))),
            Err(TerritoryError::BlankBoundary { row: 4 })
        ));
        assert!(matches!(
            loader.parse(&row(Some("A"), Some("1"), Some("[[0,0],[1,1],[2,2]]"))),
            Err(TerritoryError::Geometry { source: GeometryError::Invalid(_), .. })
        ));
        assert!(matches!(
            loader.parse(&row(Some("A"), Some("1"), Some("[[0,86],[1,86],[1,87]]"))),
            Err(TerritoryError::Geometry { source: GeometryError::Projection(_), .. })
        ));
    }
    
    #[test]
    fn test_file_stem_sanitization() {
        let loader = TerritoryLoader::new(CrsConfig::default());
        let mut territory = loader.parse(&row(Some("Oak/Elm: North "), Some("4.5a"), Some(SQUARE))).unwrap();
        assert_eq!(territory.file_name("pdf"), "Oak_Elm_ North-4_5a.pdf");
        
        territory.name = "   ".to_string();
        territory.number = " ".to_string();
        assert_eq!(territory.file_stem(), "Territory_Row_4-NoNum");
    }
    
    #[test]
    fn test_table_shape_and_missing_tokens() {
        let schema = TableSchema::by_index(0, 1, 2);
        let text = "name,number,boundary\nA,1,\"[[0,0],[1,0],[1,1]]\"\nNA,,x\nC\n";
        let table = TerritoryTable::from_reader(text.as_bytes(), &schema, "mem").unwrap();
        
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[0].name.as_deref(), Some("A"));
        assert_eq!(table.rows[1].name, None);
        assert_eq!(table.rows[1].number, None);
        assert_eq!(table.rows[2].boundary, None);
        assert_eq!(table.rows[2].index, 2);
    }
    
    #[test]
    fn test_table_column_mismatch() {
        let text = "a,b,c\n1,2,3\n";
        let result = TerritoryTable::from_reader(text.as_bytes(), &TableSchema::default(), "mem");
        assert!(matches!(
            result,
            Err(InputError::ColumnMismatch { found: 3, required: 12, .. })
        ));
        
        let schema = TableSchema {
            boundary: ColumnRef::Header("Boundary".into()),
            ..TableSchema::by_index(0, 1, 2)
        };
        let result = TerritoryTable::from_reader(text.as_bytes(), &schema, "mem");
        assert!(matches!(result, Err(InputError::MissingColumn { .. })));
    }
    
    #[test]
    fn test_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Name,Number,Boundary").unwrap();
        writeln!(file, "North,7,\"{}\"", SQUARE).unwrap();
        
        let schema = TableSchema {
            name: ColumnRef::Header("Name".into()),
            number: ColumnRef::Header("Number".into()),
            boundary: ColumnRef::Header("Boundary".into()),
            ..TableSchema::default()
        };
        let table = TerritoryTable::open(file.path(), &schema).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].boundary.as_deref(), Some(SQUARE));
        
        let missing = TerritoryTable::open(Path::new("/nonexistent/t.csv"), &schema);
        assert!(matches!(missing, Err(InputError::Open { .. })));
    }
}
