//! CLI entry point for the scouting calculation pipeline.
//!
//! Loads the schemas and coefficients, opens the document store snapshot and
//! runs calculation cycles until interrupted.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scout_pipeline::calculations::{PipelineContext, default_pipeline};
use scout_pipeline::config::PipelineConfig;
use scout_pipeline::orchestrator::Orchestrator;
use scout_pipeline::schema::{Coefficients, SchemaSet};
use scout_pipeline::store::MemoryStore;
use scout_pipeline::tba::{MatchDataApi, StaticMatchData, TbaClient};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "scout_pipeline")]
#[command(about = "Incremental calculations over scouting observations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run calculation cycles against the document store
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Event key on the match-data service (e.g. 2024caav)
    #[arg(long, env = "EVENT_KEY")]
    event_key: String,

    /// Directory holding the store snapshot, one JSON array per collection
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory of calculation schemas
    #[arg(long, default_value = "schemas")]
    schema_dir: PathBuf,

    /// Regression coefficients document
    #[arg(long, default_value = "data/regression_coefficients.json")]
    coefficients: PathBuf,

    /// JSON array of team numbers at the event
    #[arg(long)]
    teams_list: Option<PathBuf>,

    /// Delete every calculated collection before the first cycle
    #[arg(long, default_value_t = false)]
    full: bool,

    /// Run one cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Seconds to wait between cycles
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// CSV file to append per-calculator timings to
    #[arg(long)]
    timings: Option<PathBuf>,

    /// Serve match data from a directory of JSON files instead of the API
    #[arg(long)]
    tba_offline_dir: Option<PathBuf>,
}

impl From<RunArgs> for PipelineConfig {
    fn from(args: RunArgs) -> Self {
        PipelineConfig {
            event_key: args.event_key,
            data_dir: args.data_dir,
            schema_dir: args.schema_dir,
            coefficients: args.coefficients,
            teams_list: args.teams_list,
            full: args.full,
            once: args.once,
            interval_secs: args.interval,
            timings: args.timings,
            tba_offline_dir: args.tba_offline_dir,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/scout_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("scout_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args.into()).await?,
    }

    Ok(())
}

#[tracing::instrument(skip_all, fields(event_key = %config.event_key))]
async fn run(config: PipelineConfig) -> Result<()> {
    let schemas = SchemaSet::load(&config.schema_dir).context("loading schemas")?;
    let coefficients = Coefficients::load(&config.coefficients).context("loading coefficients")?;
    let teams = config.load_teams()?;

    let keys = schemas.collections.keys.clone();
    let store = match &config.data_dir {
        Some(dir) => MemoryStore::load_dir(dir, keys)?,
        None => MemoryStore::new().with_keys(keys),
    };

    let match_data: Box<dyn MatchDataApi> = match &config.tba_offline_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Serving match data from files");
            Box::new(StaticMatchData::load_dir(dir)?)
        }
        None => {
            let api_key = std::env::var("TBA_API_KEY").context("TBA_API_KEY must be set")?;
            Box::new(TbaClient::new(&api_key, &config.event_key)?)
        }
    };

    let ctx = PipelineContext {
        store: &store,
        match_data: match_data.as_ref(),
        schemas: &schemas,
        coefficients: &coefficients,
        teams: teams.as_deref(),
    };

    let mut orchestrator = Orchestrator::new(default_pipeline()).with_timings(config.timings.clone());
    info!(calculators = ?orchestrator.calculator_names(), "Pipeline ready");
    if config.full {
        info!("Full rebuild requested");
        orchestrator.rebuild(&store).await?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            result = orchestrator.run_cycle(&ctx) => {
                match result {
                    Ok(report) => info!(cycle = report.cycle, skipped = report.skipped(), "Cycle complete"),
                    Err(e) => {
                        error!(error = %e, "Cycle aborted");
                        save_snapshot(&store, config.data_dir.as_deref());
                        return Err(e.into());
                    }
                }
            }
        }
        save_snapshot(&store, config.data_dir.as_deref());

        if config.once {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = tokio::time::sleep(config.interval()) => {}
        }
    }

    save_snapshot(&store, config.data_dir.as_deref());
    info!("Pipeline stopped");
    Ok(())
}

fn save_snapshot(store: &MemoryStore, dir: Option<&Path>) {
    let Some(dir) = dir else {
        return;
    };
    if let Err(e) = store.save_dir(dir) {
        warn!(dir = %dir.display(), error = %e, "Failed to save store snapshot");
    }
}
