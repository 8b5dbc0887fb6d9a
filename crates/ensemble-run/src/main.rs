/// District ensemble runner: samples a Monte Carlo ensemble of maize
/// treatments for one district and season, runs it through an external crop
/// engine (or a dry run) and writes the augmented result table as JSON.

mod command_engine;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use ensemble_core::config::DISTRICTS;
use ensemble_core::engine::{DryRunEngine, SimControls, SimulationEngine};
use ensemble_core::{EnsembleConfig, EnsembleRun, EnsembleRunner, ReferenceTables, RunRequest};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::command_engine::CommandEngine;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ensemble-run", about = "Run a district Monte Carlo crop-simulation ensemble")]
struct Args {
    /// District name (see --list-districts).
    #[arg(short, long, required_unless_present = "list_districts")]
    district: Option<String>,

    /// Season year.
    #[arg(short, long, required_unless_present = "list_districts")]
    year: Option<i32>,

    /// Total seasonal nitrogen rate, kg/ha.
    #[arg(short, long, default_value = "0")]
    nitrogen_rate: f64,

    /// Pixel table (JSON rows: admin_2, pixel, SoS).
    #[arg(long, default_value = "data/pixel_input_selected_districts.json")]
    pixels: PathBuf,

    /// Cultivar table (JSON rows: admin_2, cultivar, los).
    #[arg(long, default_value = "data/skilled_cultivars.json")]
    cultivars: PathBuf,

    /// Workflow configuration JSON; omitted fields keep defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulation control options JSON object, passed to the engine as is.
    #[arg(long)]
    controls: Option<PathBuf>,

    /// Override the ensemble size from the configuration.
    #[arg(long)]
    ensemble_size: Option<usize>,

    /// Seed for reproducible sampling (omit for a fresh ensemble each run).
    #[arg(long)]
    seed: Option<u64>,

    /// External engine program; receives the batch on stdin.
    #[arg(long, conflicts_with = "dry_run")]
    engine_cmd: Option<PathBuf>,

    /// Extra argument for the engine program (repeatable).
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Build and record the batch without simulating.
    #[arg(long)]
    dry_run: bool,

    /// Output JSON file (stdout when omitted).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the districts available in the reference tables and exit.
    #[arg(long)]
    list_districts: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ensemble_run=info,ensemble_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let (tables, report) = ReferenceTables::load_json(&args.pixels, &args.cultivars)
        .with_context(|| {
            format!(
                "Failed to load reference tables {} / {}",
                args.pixels.display(),
                args.cultivars.display()
            )
        })?;
    info!(
        kept = report.pixels_kept,
        dropped = report.pixels_dropped,
        cultivars = report.cultivars,
        "reference tables loaded"
    );

    if args.list_districts {
        for district in tables.districts() {
            println!("{district}");
        }
        return Ok(());
    }

    let (Some(district), Some(year)) = (args.district.clone(), args.year) else {
        bail!("--district and --year are required");
    };
    if !DISTRICTS.contains(&district.as_str()) {
        warn!(district = %district, "district is not one of the prepared districts");
    }

    let mut config = match &args.config {
        Some(path) => EnsembleConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EnsembleConfig::default(),
    };
    if let Some(n) = args.ensemble_size {
        config.ensemble_size = n;
    }
    if config.input_root.is_relative() {
        config.input_root = std::env::current_dir()
            .context("Failed to resolve working directory")?
            .join(&config.input_root);
    }

    let controls = match &args.controls {
        Some(path) => load_controls(path)?,
        None => SimControls::new(),
    };
    let request = RunRequest::new(district, year)
        .nitrogen_rate(args.nitrogen_rate)
        .controls(controls);

    let run = match (&args.engine_cmd, args.dry_run) {
        (Some(program), false) => {
            let engine = CommandEngine::new(program, args.engine_args.clone());
            run_with(&tables, &engine, config, &request, args.seed)?
        }
        (None, true) => run_with(&tables, &DryRunEngine::new(), config, &request, args.seed)?,
        _ => bail!("choose an engine with --engine-cmd or use --dry-run"),
    };

    let json = serde_json::to_string_pretty(&run)?;
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(rows = run.rows.len(), output = %path.display(), "results written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_with<E: SimulationEngine>(
    tables: &ReferenceTables,
    engine: &E,
    config: EnsembleConfig,
    request: &RunRequest,
    seed: Option<u64>,
) -> Result<EnsembleRun> {
    let runner = EnsembleRunner::new(tables, engine, config);
    let run = match seed {
        Some(seed) => runner.run_district_with_rng(&mut StdRng::seed_from_u64(seed), request),
        None => runner.run_district(request),
    };
    run.with_context(|| format!("District run failed for {} {}", request.district, request.year))
}

fn load_controls(path: &Path) -> Result<SimControls> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read controls {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Controls in {} must be a JSON object", path.display()))
}
