//! ProcessingCoordinator - drives the per-territory pipeline.
//!
//! One run loads the addresses, projects them once, reads the territory
//! table and then handles every row in order. A row's failure is logged
//! and skipped; only input problems and unexpected run-level panics
//! fail the whole run.

use crate::cancel::CancelToken;
use crate::handle::RunHandle;
use crate::state::ProcessingState;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use territory_core::{
    sort_and_group, AddressCollection, AddressStore, DocumentAssembler, FilteredAddressSet, InputError,
    MapComposer, MapImage, ReportConfig, SpatialFilter, TableContent, TerritoryError, TerritoryLoader,
    TerritoryRow, TerritoryTable,
};
use territory_env::{DocumentBuilder, DocumentError, EventSink, MapRenderer, RunEvent, RunStatus};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Prefix of the per-row temporary map raster
const TEMP_RASTER_PREFIX: &str = "_temp_map_image_";

// =============================================================================
// ERRORS
// =============================================================================

/// Failure while processing a single territory row.
#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Territory(#[from] TerritoryError),
    
    #[error("Document build failed: {0}")]
    Document(#[from] DocumentError),
    
    #[error("Temporary raster unavailable: {0}")]
    TempFile(std::io::Error),
    
    #[error("Panic while processing row: {0}")]
    Panic(String),
}

impl RowError {
    /// Rejected input rather than a processing failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, RowError::Territory(_))
    }
}

/// Failure that ends the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Input(#[from] InputError),
    
    #[error("Unexpected failure: {0}")]
    Panic(String),
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// REQUEST / OUTCOME
// =============================================================================

/// Inputs of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// KML address source; `None` means no address data at all
    pub address_source: Option<PathBuf>,
    pub territory_table: PathBuf,
    pub output_dir: PathBuf,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub summary: String,
    
    /// Rows in the territory table
    pub total_rows: usize,
    
    /// Addresses available for matching after projection
    pub addresses: usize,
    
    /// Documents written, in row order
    pub written: Vec<PathBuf>,
    
    /// Rows rejected for bad name or boundary
    pub skipped: usize,
    
    /// Rows that failed while processing
    pub failed: usize,
}

impl RunOutcome {
    fn new() -> Self {
        Self {
            status: RunStatus::Idle,
            summary: String::new(),
            total_rows: 0,
            addresses: 0,
            written: Vec::new(),
            skipped: 0,
            failed: 0,
        }
    }
    
    /// Outcome for a run that never reported back.
    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            summary: summary.into(),
            ..Self::new()
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Emits events and mirrors log lines into tracing.
struct Events<'a> {
    sink: &'a dyn EventSink,
}

impl Events<'_> {
    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.sink.emit(RunEvent::Log(line));
    }
    
    fn progress(&self, current: usize, total: usize, label: impl Into<String>) {
        self.sink.emit(RunEvent::Progress {
            current,
            total,
            label: label.into(),
        });
    }
    
    fn data_loaded(&self, success: bool, message: impl Into<String>) {
        let message = message.into();
        if success {
            info!("{}", message);
        } else {
            warn!("{}", message);
        }
        self.sink.emit(RunEvent::DataLoaded { success, message });
    }
    
    fn finished(&self, status: RunStatus, summary: &str) {
        self.sink.emit(RunEvent::Finished {
            status,
            summary: summary.to_string(),
        });
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Per-run context shared by every row.
struct RowContext<'a> {
    filter: Option<&'a SpatialFilter>,
    output_dir: &'a Path,
    loader: TerritoryLoader,
    composer: MapComposer,
    assembler: DocumentAssembler,
}

/// Sequential territory report pipeline.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<ReportConfig>,
    renderer: Arc<dyn MapRenderer>,
    builder: Arc<dyn DocumentBuilder>,
}

impl Coordinator {
    pub fn new(
        config: Arc<ReportConfig>,
        renderer: Arc<dyn MapRenderer>,
        builder: Arc<dyn DocumentBuilder>,
    ) -> Self {
        Self {
            config,
            renderer,
            builder,
        }
    }
    
    pub fn config(&self) -> &ReportConfig {
        &self.config
    }
    
    /// Runs in the background on tokio's blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: RunRequest) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        
        let coordinator = self.clone();
        let token = cancel.clone();
        // The task owns the only sender, so the channel closes when the run ends.
        let task = tokio::task::spawn_blocking(move || coordinator.run(&request, &tx, &token));
        
        RunHandle::new(task, rx, cancel)
    }
    
    /// Runs to completion on the calling thread.
    ///
    /// Always ends with exactly one `Finished` event.
    pub fn run(&self, request: &RunRequest, sink: &dyn EventSink, cancel: &CancelToken) -> RunOutcome {
        let events = Events { sink };
        let mut state = ProcessingState::new(cancel.clone());
        let mut outcome = RunOutcome::new();
        state.start();
        
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(request, &events, &mut state, &mut outcome)
        }))
        .unwrap_or_else(|payload| Err(RunError::Panic(panic_message(payload))));
        
        let (status, summary) = match result {
            Ok(RunStatus::Completed) => (
                RunStatus::Completed,
                format!(
                    "Processing complete! {} of {} territories written ({} skipped, {} failed).",
                    outcome.written.len(),
                    outcome.total_rows,
                    outcome.skipped,
                    outcome.failed
                ),
            ),
            Ok(status) => (status, "Processing cancelled by user.".to_string()),
            Err(e) => {
                events.log(format!("--- Critical error ---\nError: {}", e));
                (RunStatus::Failed, format!("Error: {}", e))
            }
        };
        
        state.finish(status);
        outcome.status = state.status();
        outcome.summary = summary;
        events.finished(outcome.status, &outcome.summary);
        outcome
    }
    
    /// The run proper; returns the terminal status on a normal end.
    fn execute(
        &self,
        request: &RunRequest,
        events: &Events<'_>,
        state: &mut ProcessingState,
        outcome: &mut RunOutcome,
    ) -> Result<RunStatus, RunError> {
        events.log("--- Processing Started ---");
        if state.is_cancelled() {
            return Ok(RunStatus::Cancelled);
        }
        
        let working = self.config.crs.working;
        let filter = self.load_addresses(request, events).map(|addresses| {
            if !addresses.is_empty() {
                events.log(format!("  Projecting all addresses to {} (one-time)...", working));
            }
            let filter = SpatialFilter::new(&addresses, working);
            if filter.unprojectable() > 0 {
                events.log(format!(
                    "  WARNING: {} addresses could not be projected and were dropped.",
                    filter.unprojectable()
                ));
            }
            filter
        });
        outcome.addresses = filter.as_ref().map_or(0, SpatialFilter::len);
        
        events.log(format!("Loading territory table: {}", request.territory_table.display()));
        let table = TerritoryTable::open(&request.territory_table, &self.config.table)?;
        let total = table.len();
        state.set_total(total);
        outcome.total_rows = total;
        events.log(format!("Loaded {} rows from territory table.", total));
        
        std::fs::create_dir_all(&request.output_dir).map_err(|source| InputError::OutputDir {
            path: request.output_dir.display().to_string(),
            source,
        })?;
        
        let context = RowContext {
            filter: filter.as_ref(),
            output_dir: &request.output_dir,
            loader: TerritoryLoader::new(self.config.crs),
            composer: MapComposer::new(self.config.map.clone()),
            assembler: DocumentAssembler::new(self.config.layout.clone()),
        };
        
        for row in &table.rows {
            if state.is_cancelled() {
                events.log("Cancellation requested, stopping before the next territory.");
                return Ok(RunStatus::Cancelled);
            }
            state.enter_row(row.index);
            events.progress(row.index, total, format!("Territory {}/{}", row.index + 1, total));
            
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_row(row, &context, events)))
                .unwrap_or_else(|payload| Err(RowError::Panic(panic_message(payload))));
            
            match result {
                Ok(path) => outcome.written.push(path),
                Err(e) if e.is_skip() => {
                    events.log(format!("  Skip row {}: {}", row.index, e));
                    outcome.skipped += 1;
                }
                Err(e) => {
                    events.log(format!(
                        "  --- Error row {} ({} - {}) ---",
                        row.index,
                        row.name.as_deref().unwrap_or("?"),
                        row.number.as_deref().unwrap_or("?")
                    ));
                    events.log(format!("  Details: {}", e));
                    outcome.failed += 1;
                }
            }
        }
        
        events.progress(total, total, "All territories processed.");
        Ok(RunStatus::Completed)
    }
    
    /// Loads the address source, absorbing its errors.
    ///
    /// `None` when no source was given; an empty collection when the
    /// source was given but yielded nothing.
    fn load_addresses(&self, request: &RunRequest, events: &Events<'_>) -> Option<AddressCollection> {
        const EMPTY: &str = "Address data empty or failed to load. House numbers will be missing.";
        let source_crs = self.config.crs.source;
        
        let Some(path) = &request.address_source else {
            events.data_loaded(false, "No address source given. Tables will show the no-data placeholder.");
            return None;
        };
        
        events.log(format!("  Loading address source: {}", path.display()));
        let store = AddressStore::new(self.config.addresses.clone(), source_crs);
        let collection = match store.load(path) {
            Ok(load) => {
                events.log(format!("    - Found {} total placemarks.", load.placemark_count));
                events.log(format!(
                    "    - Extracted {} address entries with house numbers.",
                    load.collection.len()
                ));
                load.collection
            }
            Err(e) => {
                events.log(format!("  ERROR: {}", e));
                AddressCollection::empty(source_crs)
            }
        };
        
        if collection.is_empty() {
            events.data_loaded(false, EMPTY);
        } else {
            events.data_loaded(true, format!("Address data loaded: {} addresses found.", collection.len()));
        }
        Some(collection)
    }
    
    /// Produces the document for one row.
    fn process_row(&self, row: &TerritoryRow, context: &RowContext<'_>, events: &Events<'_>) -> Result<PathBuf, RowError> {
        let territory = context.loader.parse(row)?;
        let name = &territory.name;
        events.log(format!("Processing: {} (Row {})", territory.title(), row.index));
        
        events.log("  Filtering addresses...");
        let groups;
        let table = match context.filter {
            None => {
                events.log("    - No address data to filter.");
                TableContent::NoData
            }
            Some(filter) => {
                let matched = filter.filter(&territory).unwrap_or_else(|e| {
                    events.log(format!("    - Error filtering: {}", e));
                    FilteredAddressSet::empty(territory.working_crs)
                });
                events.log(format!("    - Found {} addresses in territory.", matched.len()));
                groups = sort_and_group(&matched.addresses);
                TableContent::Groups(&groups)
            }
        };
        
        events.log("  Generating map image...");
        let raster = tempfile::Builder::new()
            .prefix(TEMP_RASTER_PREFIX)
            .suffix(".png")
            .tempfile_in(context.output_dir)
            .map_err(RowError::TempFile)?
            .into_temp_path();
        
        let map = match context
            .composer
            .compose(self.renderer.as_ref(), &territory.projected, territory.working_crs)
        {
            Ok(composed) => {
                if let Some(e) = &composed.render_error {
                    events.log(format!("  Basemap unavailable for {}: {}.", name, e));
                }
                match composed.save_png(&raster) {
                    Ok(()) => {
                        events.log(format!("  Map image saved: {}", raster.display()));
                        Some(MapImage {
                            path: raster.to_path_buf(),
                            attribution: composed
                                .has_basemap()
                                .then(|| self.config.map.provider.attribution.clone()),
                        })
                    }
                    Err(e) => {
                        events.log(format!("  Map image error for {}: {}", name, e));
                        None
                    }
                }
            }
            Err(e) => {
                events.log(format!("  Map error for {}: {}", name, e));
                None
            }
        };
        
        events.log("  Generating document...");
        let report = context.assembler.assemble(&territory.title(), map.as_ref(), table);
        if let Some(e) = &report.image_error {
            events.log(format!("  Error with map image for {}: {}", name, e));
        }
        
        let target = context.output_dir.join(territory.file_name(self.builder.extension()));
        let written = self.builder.build(&report.document, &target)?;
        events.log(format!("  Saved document: {}", written.display()));
        
        if let Err(e) = raster.close() {
            events.log(format!("  Could not delete temporary map image: {}", e));
        }
        Ok(written)
    }
}
