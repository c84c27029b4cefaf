//! End-to-end runs of the coordinator against stub collaborators.

use geo::Polygon;
use image::{Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use territory_core::assembler::{NO_ADDRESSES, NO_ADDRESS_DATA};
use territory_core::config::TableSchema;
use territory_core::ReportConfig;
use territory_env::{
    DisabledRenderer, DocumentBuilder, DocumentError, JsonDocumentBuilder, MapFrame, MapRenderer,
    RecordingSink, RenderError, ReportDocument, RunEvent, RunStatus, TableRow, TileMapRenderer,
    TileProvider,
};
use territory_runner::{CancelToken, Coordinator, RunRequest};

const SQUARE: &str = "[[-89.70, 39.70], [-89.60, 39.70], [-89.60, 39.80], [-89.70, 39.80]]";
const EAST_SQUARE: &str = "[[-89.50, 39.70], [-89.40, 39.70], [-89.40, 39.80], [-89.50, 39.80]]";
/// Ring that crosses itself once, leaving a large eastern lobe and a small western one.
const LOOPED: &str = "[[-89.70, 39.70], [-89.60, 39.80], [-89.60, 39.70], [-89.70, 39.75]]";

// =============================================================================
// FIXTURES
// =============================================================================

fn config() -> ReportConfig {
    let mut config = ReportConfig::default();
    config.table = TableSchema::by_index(0, 1, 2);
    config.map.dpi = 20;
    config
}

fn write_table(dir: &Path, rows: &[(&str, &str, &str)]) -> PathBuf {
    let path = dir.join("territories.csv");
    let mut text = String::from("name,number,boundary\n");
    for (name, number, boundary) in rows {
        text.push_str(&format!("{},{},\"{}\"\n", name, number, boundary));
    }
    fs::write(&path, text).unwrap();
    path
}

fn placemark(number: &str, street: &str, lon: f64, lat: f64) -> String {
    format!(
        r#"<Placemark>
  <ExtendedData><SchemaData>
    <SimpleData name="STREET_NUM">{}</SimpleData>
    <SimpleData name="STREET_NAM">{}</SimpleData>
    <SimpleData name="STREET_TYP">St</SimpleData>
    <SimpleData name="CITY">Springfield</SimpleData>
    <SimpleData name="STATE">IL</SimpleData>
    <SimpleData name="ZIP">62701</SimpleData>
  </SchemaData></ExtendedData>
  <Point><coordinates>{},{},0</coordinates></Point>
</Placemark>"#,
        number, street, lon, lat
    )
}

fn write_kml(dir: &Path, placemarks: &[String]) -> PathBuf {
    let path = dir.join("addresses.kml");
    let text = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"><Document>{}</Document></kml>"#,
        placemarks.join("\n")
    );
    fs::write(&path, text).unwrap();
    path
}

fn coordinator(renderer: Arc<dyn MapRenderer>, builder: Arc<dyn DocumentBuilder>) -> Coordinator {
    Coordinator::new(Arc::new(config()), renderer, builder)
}

fn json_coordinator() -> Coordinator {
    coordinator(Arc::new(DisabledRenderer), Arc::new(JsonDocumentBuilder))
}

fn read_document(path: &Path) -> ReportDocument {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn output_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Renderer returning a flat grey basemap.
struct GreyRenderer;

impl MapRenderer for GreyRenderer {
    fn render(
        &self,
        _boundary: &Polygon<f64>,
        frame: &MapFrame,
        _zoom: u8,
        _provider: &TileProvider,
    ) -> Result<RgbaImage, RenderError> {
        Ok(RgbaImage::from_pixel(frame.width_px, frame.height_px, Rgba([180, 180, 180, 255])))
    }
}

/// Renderer that panics on its first call only.
#[derive(Default)]
struct PanicOnceRenderer {
    calls: AtomicUsize,
}

impl MapRenderer for PanicOnceRenderer {
    fn render(
        &self,
        _boundary: &Polygon<f64>,
        _frame: &MapFrame,
        _zoom: u8,
        _provider: &TileProvider,
    ) -> Result<RgbaImage, RenderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("renderer exploded");
        }
        Err(RenderError::Disabled)
    }
}

/// JSON builder that requests cancellation after `after` documents.
struct CancellingBuilder {
    token: CancelToken,
    after: usize,
    built: AtomicUsize,
}

impl DocumentBuilder for CancellingBuilder {
    fn extension(&self) -> &'static str {
        "json"
    }
    
    fn build(&self, document: &ReportDocument, path: &Path) -> Result<PathBuf, DocumentError> {
        let written = JsonDocumentBuilder.build(document, path)?;
        if self.built.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        Ok(written)
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_scenario_a_single_inside_address() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let request = RunRequest {
        address_source: Some(write_kml(
            dir.path(),
            &[
                placemark("100", "Main", -89.65, 39.75),
                placemark("200", "Main", -89.55, 39.75),
            ],
        )),
        territory_table: write_table(dir.path(), &[("North", "1", SQUARE)]),
        output_dir: out.clone(),
    };
    
    let sink = RecordingSink::new();
    let outcome = json_coordinator().run(&request, &sink, &CancelToken::new());
    
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.addresses, 2);
    assert_eq!(outcome.written, vec![out.join("North-1.json")]);
    assert_eq!(output_names(&out), vec!["North-1.json"]);
    
    let document = read_document(&outcome.written[0]);
    assert_eq!(document.title(), Some("North - 1"));
    assert!(document.image().is_some());
    
    let table = document.table().unwrap();
    assert_eq!(table.data_row_count(), 1);
    assert!(matches!(&table.rows[0], TableRow::Group { label, .. } if label == "MAIN ST"));
    assert!(matches!(
        &table.rows[1],
        TableRow::Data { cells, .. } if cells[0] == "100 Main St" && cells[2] == "Springfield, IL 62701"
    ));
    
    let events = sink.events();
    assert!(events.contains(&RunEvent::Progress {
        current: 0,
        total: 1,
        label: "Territory 1/1".into()
    }));
    assert!(events.contains(&RunEvent::Progress {
        current: 1,
        total: 1,
        label: "All territories processed.".into()
    }));
    assert!(matches!(sink.finished(), Some((RunStatus::Completed, _))));
}

#[test]
fn test_scenario_b_missing_address_source() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let request = RunRequest {
        address_source: Some(dir.path().join("missing.kml")),
        territory_table: write_table(dir.path(), &[("North", "1", SQUARE), ("East", "2", EAST_SQUARE)]),
        output_dir: out.clone(),
    };
    
    let sink = RecordingSink::new();
    let outcome = json_coordinator().run(&request, &sink, &CancelToken::new());
    
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, RunEvent::DataLoaded { success: false, .. })));
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.written.len(), 2);
    for path in &outcome.written {
        let document = read_document(path);
        assert!(document.table().is_none());
        assert!(document.paragraphs().contains(&NO_ADDRESSES));
    }
}

#[test]
fn test_scenario_c_bad_boundary_skips_only_that_row() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(
            dir.path(),
            &[("North", "1", SQUARE), ("Broken", "2", "[[0, 0], [1, 0"), ("East", "3", EAST_SQUARE)],
        ),
        output_dir: out.clone(),
    };
    
    let sink = RecordingSink::new();
    let outcome = json_coordinator().run(&request, &sink, &CancelToken::new());
    
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(output_names(&out), vec!["East-3.json", "North-1.json"]);
    assert!(sink
        .log_lines()
        .iter()
        .any(|l| l.contains("Skip row 1") && l.contains("Geometry error for Broken")));
}

#[test]
fn test_looped_boundary_keeps_its_largest_lobe() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let request = RunRequest {
        address_source: Some(write_kml(
            dir.path(),
            &[
                placemark("10", "Elm", -89.6125, 39.75),
                placemark("20", "Elm", -89.6925, 39.725),
            ],
        )),
        territory_table: write_table(dir.path(), &[("Loop", "4", LOOPED)]),
        output_dir: out.clone(),
    };
    
    let sink = RecordingSink::new();
    let outcome = json_coordinator().run(&request, &sink, &CancelToken::new());
    
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.written, vec![out.join("Loop-4.json")]);
    
    let document = read_document(&outcome.written[0]);
    let table = document.table().unwrap();
    assert_eq!(table.data_row_count(), 1);
    assert!(table
        .rows
        .iter()
        .any(|row| matches!(row, TableRow::Data { cells, .. } if cells[0] == "10 Elm St")));
}

#[test]
fn test_scenario_d_cancel_after_second_row() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let rows: Vec<(String, String)> = (1..=5).map(|i| (format!("T{}", i), i.to_string())).collect();
    let table: Vec<(&str, &str, &str)> = rows
        .iter()
        .map(|(name, number)| (name.as_str(), number.as_str(), SQUARE))
        .collect();
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(dir.path(), &table),
        output_dir: out.clone(),
    };
    
    let token = CancelToken::new();
    let builder = CancellingBuilder {
        token: token.clone(),
        after: 2,
        built: AtomicUsize::new(0),
    };
    let sink = RecordingSink::new();
    let outcome = coordinator(Arc::new(DisabledRenderer), Arc::new(builder)).run(&request, &sink, &token);
    
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(matches!(sink.finished(), Some((RunStatus::Cancelled, _))));
    assert_eq!(output_names(&out), vec!["T1-1.json", "T2-2.json"]);
    assert!(!sink.events().iter().any(|e| matches!(
        e,
        RunEvent::Progress { label, .. } if label == "All territories processed."
    )));
}

// =============================================================================
// FAILURE MODES
// =============================================================================

#[test]
fn test_no_address_source_uses_no_data_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(dir.path(), &[("North", "", SQUARE)]),
        output_dir: dir.path().join("out"),
    };
    
    let outcome = json_coordinator().run(&request, &RecordingSink::new(), &CancelToken::new());
    assert_eq!(outcome.written, vec![dir.path().join("out").join("North-NoNum.json")]);
    
    let document = read_document(&outcome.written[0]);
    assert_eq!(document.title(), Some("North - NoNum"));
    assert!(document.paragraphs().contains(&NO_ADDRESS_DATA));
}

#[test]
fn test_table_shape_mismatch_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("narrow.csv");
    fs::write(&table, "name,number\nNorth,1\n").unwrap();
    let request = RunRequest {
        address_source: None,
        territory_table: table,
        output_dir: dir.path().join("out"),
    };
    
    let sink = RecordingSink::new();
    let outcome = json_coordinator().run(&request, &sink, &CancelToken::new());
    
    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.summary.starts_with("Error:"));
    assert!(outcome.written.is_empty());
    assert!(!sink.events().iter().any(|e| matches!(e, RunEvent::Progress { .. })));
    assert!(matches!(sink.finished(), Some((RunStatus::Failed, _))));
}

#[test]
fn test_cancel_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(dir.path(), &[("North", "1", SQUARE)]),
        output_dir: dir.path().join("out"),
    };
    
    let token = CancelToken::new();
    token.cancel();
    let sink = RecordingSink::new();
    let outcome = json_coordinator().run(&request, &sink, &token);
    
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(!dir.path().join("out").exists());
    assert!(!sink.events().iter().any(|e| matches!(e, RunEvent::DataLoaded { .. })));
}

#[test]
fn test_panicking_row_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(dir.path(), &[("North", "1", SQUARE), ("East", "2", EAST_SQUARE)]),
        output_dir: out.clone(),
    };
    
    let sink = RecordingSink::new();
    let outcome = coordinator(Arc::new(PanicOnceRenderer::default()), Arc::new(JsonDocumentBuilder))
        .run(&request, &sink, &CancelToken::new());
    
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.failed, 1);
    assert_eq!(output_names(&out), vec!["East-2.json"]);
    assert!(sink.log_lines().iter().any(|l| l.contains("renderer exploded")));
}

#[test]
fn test_basemap_adds_attribution_and_cleans_raster() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(dir.path(), &[("North", "1", SQUARE)]),
        output_dir: out.clone(),
    };
    
    let outcome = coordinator(Arc::new(GreyRenderer), Arc::new(JsonDocumentBuilder))
        .run(&request, &RecordingSink::new(), &CancelToken::new());
    
    let document = read_document(&outcome.written[0]);
    let attribution = config().map.provider.attribution;
    assert!(document.paragraphs().contains(&attribution.as_str()));
    assert_eq!(output_names(&out), vec!["North-1.json"]);
}

// =============================================================================
// BACKGROUND RUN
// =============================================================================

#[tokio::test]
async fn test_background_run_streams_events() {
    let dir = tempfile::tempdir().unwrap();
    let request = RunRequest {
        address_source: Some(write_kml(dir.path(), &[placemark("7", "Oak", -89.65, 39.75)])),
        territory_table: write_table(dir.path(), &[("North", "1", SQUARE)]),
        output_dir: dir.path().join("out"),
    };
    
    let mut handle = json_coordinator().start(request);
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    let outcome = handle.wait().await;
    
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(matches!(events.first(), Some(RunEvent::Log(line)) if line.contains("Processing Started")));
    assert!(matches!(events.last(), Some(RunEvent::Finished { status: RunStatus::Completed, .. })));
    assert!(events.contains(&RunEvent::DataLoaded {
        success: true,
        message: "Address data loaded: 1 addresses found.".into()
    }));
}

#[tokio::test]
async fn test_event_channel_closes_after_finished() {
    let dir = tempfile::tempdir().unwrap();
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(dir.path(), &[("North", "1", SQUARE)]),
        output_dir: dir.path().join("out"),
    };
    
    let mut handle = json_coordinator().start(request);
    let mut last = None;
    while let Some(event) = handle.events().recv().await {
        last = Some(event);
    }
    
    assert!(matches!(last, Some(RunEvent::Finished { status: RunStatus::Completed, .. })));
    assert_eq!(handle.wait().await.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_tile_renderer_lives_inside_async_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let request = RunRequest {
        address_source: None,
        territory_table: write_table(dir.path(), &[("Broken", "1", "[[0, 0], [1, 0")]),
        output_dir: dir.path().join("out"),
    };
    
    let renderer = Arc::new(TileMapRenderer::new("territory-maps-test", 4));
    let coordinator = coordinator(renderer, Arc::new(JsonDocumentBuilder));
    let mut handle = coordinator.start(request);
    while handle.next_event().await.is_some() {}
    let outcome = handle.wait().await;
    drop(coordinator);
    
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.skipped, 1);
}
