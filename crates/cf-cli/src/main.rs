//! cutflow CLI

use anyhow::{Context, Result};
use cf_core::RecordSource;
use cf_data::Dataset;
use cf_engine::{Engine, RunConfig, Sink};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cutflow")]
#[command(about = "cutflow - parallel cut/weight/fill aggregation over jagged records")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a configuration over a dataset and report counters and sink contents
    Run {
        /// Input dataset (JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Worker threads (0 = one per available core)
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Number of entries to process. Defaults to all.
        #[arg(long)]
        entries: Option<u64>,

        /// First entry to process
        #[arg(long, default_value = "0")]
        first: u64,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration against a dataset without running it
    Check {
        /// Input dataset (JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Run { data, config, workers, entries, first, output } => {
            cmd_run(&data, &config, workers, entries, first, output.as_ref())
        }
        Commands::Check { data, config } => cmd_check(&data, &config),
    }
}

fn load(data: &Path, config: &Path) -> Result<Engine> {
    let dataset = Dataset::open(data).with_context(|| format!("failed to read dataset {}", data.display()))?;
    let run = RunConfig::open(config).with_context(|| format!("failed to read config {}", config.display()))?;
    tracing::info!(
        "dataset: {} entries in {} partition(s)",
        dataset.entry_count(),
        dataset.partitions().len()
    );

    let mut engine = Engine::new(Arc::new(dataset));
    run.apply(&mut engine).with_context(|| format!("invalid config {}", config.display()))?;
    Ok(engine)
}

fn cmd_run(
    data: &Path,
    config: &Path,
    workers: usize,
    entries: Option<u64>,
    first: u64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut engine = load(data, config)?;
    let workers = if workers == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        workers
    };

    let start = std::time::Instant::now();
    let read = engine.execute(entries, first, workers).context("run failed")?;
    tracing::info!("processed {read} entries in {:.3}s", start.elapsed().as_secs_f64());

    write_json(output, serde_json::to_value(engine.report())?)
}

fn cmd_check(data: &Path, config: &Path) -> Result<()> {
    let engine = load(data, config)?;
    let cuts: Vec<serde_json::Value> = engine
        .cuts()
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name(),
                "sinks": c.sinks().iter().map(|s| s.name()).collect::<Vec<_>>(),
            })
        })
        .collect();
    write_json(
        None,
        serde_json::json!({
            "ok": true,
            "entries": engine.source().entry_count(),
            "cuts": cuts,
            "expressions": engine.library().live_count(),
        }),
    )
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
