use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde_json::to_writer_pretty;
use stage_chain::config::{ChainConfig, TaskOverrides};
use stage_chain::observability::{
    ConsoleObserver, MetricsCollector, MetricsSnapshot, StageObserver, TracingObserver,
    configure_tracing, log_snapshot,
};
use stage_chain::tasks::{Task, run_task};
use stage_chain::validation::validate_config;
use tracing::{error, info, warn};

fn main() -> Result<()> {
    let Cli {
        command,
        config,
        workers,
        print_metrics,
        metrics_json,
    } = Cli::parse();

    let Some(command) = command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    configure_tracing()?;

    let mut chain_config = ChainConfig::resolve(config.as_deref())?;
    if let Some(workers) = workers {
        chain_config.workers = Some(workers);
    }

    let metrics = MetricsOutput {
        print: print_metrics,
        json: metrics_json,
    };

    match command {
        Commands::Array(args) => run_tasks(&[Task::Array], chain_config, &args, &metrics),
        Commands::Differences(args) => {
            run_tasks(&[Task::Differences], chain_config, &args, &metrics)
        }
        Commands::All(args) => run_tasks(&Task::ALL, chain_config, &args, &metrics),
        Commands::CheckConfig => check_config(&chain_config, config.as_deref()),
    }
}

struct MetricsOutput {
    print: bool,
    json: Option<PathBuf>,
}

fn run_tasks(
    tasks: &[Task],
    mut config: ChainConfig,
    args: &TaskArgs,
    metrics: &MetricsOutput,
) -> Result<()> {
    for &task in tasks {
        args.overrides().apply(task.settings_mut(&mut config));
    }
    ensure_valid(&config)?;

    let collector = MetricsCollector::new();
    let observers: Vec<Arc<dyn StageObserver>> = vec![
        Arc::new(ConsoleObserver::stdout()),
        Arc::new(TracingObserver),
        Arc::new(collector.clone()),
    ];

    let mut outcome = Ok(());
    for (position, &task) in tasks.iter().enumerate() {
        if position > 0 {
            println!();
        }
        if let Err(err) = run_task(task, &config, &observers) {
            outcome = Err(err);
            break;
        }
    }

    write_metrics(&collector.snapshot(), metrics)?;
    outcome
}

fn ensure_valid(config: &ChainConfig) -> Result<()> {
    let report = validate_config(config);
    for warning in &report.warnings {
        warn!("{warning}");
    }
    if report.is_ok() {
        return Ok(());
    }
    for error_msg in &report.errors {
        error!("{error_msg}");
    }
    Err(anyhow!(
        "Configuration validation failed with {} error(s): {}",
        report.errors.len(),
        report.errors.join("; ")
    ))
}

fn check_config(config: &ChainConfig, path: Option<&Path>) -> Result<()> {
    ensure_valid(config)?;
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<defaults>".to_string());
    info!(config = %source, "Configuration validation passed");
    println!("{config:#?}");
    Ok(())
}

fn write_metrics(snapshot: &MetricsSnapshot, output: &MetricsOutput) -> Result<()> {
    if output.print {
        log_snapshot(snapshot);
    }
    if let Some(path) = &output.json {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metrics directory: {}", parent.display())
            })?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "stage-chain",
    version,
    about = "Runs fixed chains of dependent asynchronous stages"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    workers: Option<usize>,
    #[arg(long, global = true)]
    print_metrics: bool,
    #[arg(long = "metrics-json", global = true)]
    metrics_json: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate integers, add 10, halve, display.
    Array(TaskArgs),
    /// Generate reals and multiply their consecutive differences.
    Differences(TaskArgs),
    /// Run both chains one after the other.
    All(TaskArgs),
    CheckConfig,
}

#[derive(Args, Debug, Clone, Default)]
struct TaskArgs {
    #[arg(long = "len")]
    length: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long = "delay-ms")]
    delay_ms: Option<u64>,
    /// Inclusive lower bound of generated values.
    #[arg(long, allow_negative_numbers = true)]
    low: Option<i32>,
    /// Exclusive upper bound of generated values.
    #[arg(long, allow_negative_numbers = true)]
    high: Option<i32>,
}

impl TaskArgs {
    fn overrides(&self) -> TaskOverrides {
        TaskOverrides {
            length: self.length,
            stage_delay_ms: self.delay_ms,
            seed: self.seed,
            low: self.low,
            high: self.high,
        }
    }
}
