//! Territory map report CLI
//!
//! Produces one report per territory row, with a masked map and the
//! addresses inside the territory grouped by street.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use territory_core::ReportConfig;
use territory_env::{
    DisabledRenderer, DocumentBuilder, JsonDocumentBuilder, MapRenderer, PdfDocumentBuilder, RunEvent,
    RunStatus, TileMapRenderer,
};
use territory_runner::{Coordinator, RunRequest};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pdf,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "territory-maps")]
#[command(about = "Generate one map report per territory", long_about = None)]
#[command(version)]
struct Args {
    /// Territory table (CSV)
    #[arg(short, long)]
    territories: PathBuf,
    
    /// Geocoded address points (KML)
    #[arg(short, long)]
    addresses: Option<PathBuf>,
    
    /// Output directory
    #[arg(short, long, default_value = "Generated_Map_PDFs")]
    output: PathBuf,
    
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    
    /// Report file format
    #[arg(short, long, value_enum, default_value = "pdf")]
    format: OutputFormat,
    
    /// Basemap tile zoom level (overrides the config)
    #[arg(short, long)]
    zoom: Option<u8>,
    
    /// Skip basemap tiles; draw boundaries only
    #[arg(long)]
    no_basemap: bool,
    
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    
    /// JSON summary on stdout
    #[arg(long)]
    json: bool,
}

fn renderer(args: &Args, config: &ReportConfig) -> Arc<dyn MapRenderer> {
    if args.no_basemap {
        Arc::new(DisabledRenderer)
    } else {
        Arc::new(TileMapRenderer::new(&config.map.provider.user_agent, config.map.max_tiles))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    
    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
    
    let mut config = match &args.config {
        Some(path) => ReportConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ReportConfig::default(),
    };
    if let Some(zoom) = args.zoom {
        config.map.zoom = zoom;
    }
    
    let builder: Arc<dyn DocumentBuilder> = match args.format {
        OutputFormat::Pdf => Arc::new(PdfDocumentBuilder::new()),
        OutputFormat::Json => Arc::new(JsonDocumentBuilder),
    };
    let renderer = renderer(&args, &config);
    let coordinator = Coordinator::new(Arc::new(config), renderer, builder);
    
    info!("Territory maps v{}", env!("CARGO_PKG_VERSION"));
    let mut handle = coordinator.start(RunRequest {
        address_source: args.addresses.clone(),
        territory_table: args.territories.clone(),
        output_dir: args.output.clone(),
    });
    
    let cancel = handle.cancel_token();
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(RunEvent::Progress { current, total, label }) => {
                    info!("[{}/{}] {}", current, total, label);
                }
                Some(RunEvent::Finished { .. }) | None => break,
                // Log and data-loaded lines are already mirrored into tracing.
                Some(_) => {}
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!("Interrupted; finishing the current territory before stopping");
                cancel.cancel();
            }
        }
    }
    
    let outcome = handle.wait().await;
    // The tile client owns a blocking runtime; release it off the async workers.
    tokio::task::spawn_blocking(move || drop(coordinator)).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.status == RunStatus::Failed {
        error!("{}", outcome.summary);
    } else {
        info!("{}", outcome.summary);
        for path in &outcome.written {
            info!("  {}", path.display());
        }
    }
    
    if outcome.status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
