use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use state_rates::{
    load_wide_rows, telemetry, EntityCode, LongRecord, Period, Pipeline, PipelineConfig, RunId, ScopeRegistry,
};

#[derive(Parser)]
#[command(name = "state-rates", version, about = "Reconcile monthly state reports and rank them")]
struct Cli {
    /// Pipeline config (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on validated rows and print the run report
    Ingest {
        /// Validated rows: CSV, the JSON rows array, or validate_output.json
        #[arg(long)]
        input: PathBuf,

        /// RFC 3339 or YYYYMMDD_HHMMSS; defaults to now
        #[arg(long)]
        run_id: Option<RunId>,
    },

    /// Print the resolved snapshot
    Snapshot {
        /// Only this month (YYYY-MM)
        #[arg(long)]
        period: Option<Period>,
    },

    /// Print every stored record for one entity, in run order
    History {
        #[arg(long)]
        entity: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    telemetry::init(&config.logging.level);

    match cli.command {
        Commands::Ingest { input, run_id } => run_ingest(&config, &input, run_id),
        Commands::Snapshot { period } => run_snapshot(&config, period),
        Commands::History { entity } => run_history(&config, &entity),
    }
}

fn run_ingest(config: &PipelineConfig, input: &Path, run_id: Option<RunId>) -> Result<()> {
    let rows = load_wide_rows(input)?;
    let run_id = run_id.unwrap_or_else(RunId::now);
    info!(run = %run_id, rows = rows.len(), input = %input.display(), "starting ingest");

    let mut log = config.open_log().context("Failed to open record store")?;
    let pipeline = Pipeline::new(config, ScopeRegistry::new());
    let report = pipeline
        .run(log.as_mut(), &rows, run_id)
        .with_context(|| format!("Run {} failed", run_id.label()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_snapshot(config: &PipelineConfig, period: Option<Period>) -> Result<()> {
    let log = config.open_log().context("Failed to open record store")?;
    let pipeline = Pipeline::new(config, ScopeRegistry::new());
    let snapshot = pipeline.resolve(log.as_ref())?;

    let records: Vec<LongRecord> = match period {
        Some(period) => snapshot
            .records_for_period(period)
            .into_iter()
            .cloned()
            .collect(),
        None => snapshot.to_records(),
    };

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn run_history(config: &PipelineConfig, entity: &str) -> Result<()> {
    let log = config.open_log().context("Failed to open record store")?;
    let entity = EntityCode::new(entity);

    let mut history: Vec<_> = log
        .read_all()?
        .into_iter()
        .filter(|r| r.entity == entity)
        .collect();
    history.sort_by(|a, b| a.run_id.cmp(&b.run_id).then(a.period.cmp(&b.period)));

    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}
