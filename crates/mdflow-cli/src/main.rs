//! mdflow CLI entry point.
//!
//! Runs one simulation stage against a run-history file, or reports which
//! compute back-ends this host can instantiate.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mdflow_core::{StageKind, SystemSnapshot};
use mdflow_gpu::ExecutionEnvironment;
use mdflow_pipeline::{default_registry, JobConfig, RunHistory, StagePipeline, StageRecord};
use std::path::{Path, PathBuf};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "mdflow")]
#[command(version = VERSION)]
#[command(about = "Staged molecular dynamics: minimization, NVT and NPT", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one stage and append its record to the run history
    Run {
        /// Job file (TOML with a [job] table and optional [lock] table)
        #[arg(short, long)]
        config: PathBuf,

        /// Run-history JSON, created when missing
        #[arg(long)]
        history: PathBuf,

        /// Initial system snapshot, required when the history does not exist yet
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Override the job file's stage (min, nvt, npt)
        #[arg(long)]
        stage: Option<StageKind>,

        /// Override the job file's job id
        #[arg(long)]
        job_id: Option<u64>,
    },

    /// Check which compute platforms instantiate on this host
    Platforms,
}

fn load_history(path: &Path, input: Option<&Path>) -> Result<RunHistory<SystemSnapshot>> {
    if path.exists() {
        let history = RunHistory::load(path)
            .with_context(|| format!("Failed to load run history {}", path.display()))?;
        log::info!("Loaded run history with {} records", history.len());
        return Ok(history);
    }

    let input = input.with_context(|| {
        format!(
            "Run history {} does not exist; pass --input with the initial system",
            path.display()
        )
    })?;
    let snapshot = SystemSnapshot::load(input)
        .with_context(|| format!("Failed to load system {}", input.display()))?;
    let mut history = RunHistory::new();
    history.append(StageRecord::setup(snapshot)?)?;
    log::info!("Started run history from {}", input.display());
    Ok(history)
}

fn run_stage(
    config: PathBuf,
    history_path: PathBuf,
    input: Option<PathBuf>,
    stage: Option<StageKind>,
    job_id: Option<u64>,
) -> Result<()> {
    let mut config = JobConfig::from_file(&config)
        .with_context(|| format!("Failed to read job file {}", config.display()))?;
    if let Some(stage) = stage {
        config.job.stage = stage;
    }
    if let Some(id) = job_id {
        config.job.job_id = id;
    }
    config.validate()?;

    let mut history = load_history(&history_path, input.as_deref())?;

    let environment = ExecutionEnvironment::detect();
    let arbiter = environment.arbiter(config.lock.clone())?;
    if let Some(arb) = &arbiter {
        log::info!("Arbitrating devices {:?}", arb.devices());
    }
    let pipeline = StagePipeline::new(default_registry()).with_arbiter(arbiter);

    if let Err(e) = pipeline.run(&config.job, &mut history) {
        anyhow::bail!("{}", e.user_message());
    }
    history
        .save(&history_path)
        .with_context(|| format!("Failed to write run history {}", history_path.display()))?;

    if let Some(record) = history.last() {
        println!("{}", record.log());
        println!(
            "{} stage of {} appended ({} records)",
            record.stage(),
            config.job.system_id,
            history.len()
        );
    }
    Ok(())
}

fn check_platforms() -> Result<()> {
    let registry = default_registry();
    let mut any = false;
    for (kind, status) in registry.availability() {
        match status {
            Ok(()) => {
                any = true;
                println!("{:<10} available", kind.name());
            }
            Err(e) => println!("{:<10} unavailable ({})", kind.name(), e),
        }
    }
    if !any {
        anyhow::bail!("no compute platform could be instantiated");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    log::info!("mdflow {} - Starting", VERSION);

    let result = match args.command {
        Command::Run {
            config,
            history,
            input,
            stage,
            job_id,
        } => run_stage(config, history, input, stage, job_id),
        Command::Platforms => check_platforms(),
    };

    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}
