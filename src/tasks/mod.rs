//! The two instructional chains: array arithmetic and the product of
//! consecutive differences.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::error;

use crate::config::{ChainConfig, TaskConfig};
use crate::observability::{ConsoleObserver, StageObserver, TracingObserver, configure_tracing};
use crate::pipeline::{Chain, ChainExecutor};

pub mod array;
pub mod differences;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Array,
    Differences,
}

impl Task {
    pub const ALL: [Task; 2] = [Task::Array, Task::Differences];

    pub fn number(self) -> u8 {
        match self {
            Task::Array => 1,
            Task::Differences => 2,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Task::Array => "ARRAY GENERATION AND MODIFICATION",
            Task::Differences => "PRODUCT OF CONSECUTIVE DIFFERENCES",
        }
    }

    pub fn settings(self, config: &ChainConfig) -> &TaskConfig {
        match self {
            Task::Array => &config.array,
            Task::Differences => &config.differences,
        }
    }

    pub fn settings_mut(self, config: &mut ChainConfig) -> &mut TaskConfig {
        match self {
            Task::Array => &mut config.array,
            Task::Differences => &mut config.differences,
        }
    }

    pub fn chain(self, settings: &TaskConfig) -> Chain<()> {
        match self {
            Task::Array => array::chain(settings),
            Task::Differences => differences::chain(settings),
        }
    }
}

/// Runs one task on a fresh worker pool, printing the banner lines around
/// the stage progress.
pub fn run_task(
    task: Task,
    config: &ChainConfig,
    observers: &[Arc<dyn StageObserver>],
) -> Result<()> {
    let settings = task.settings(config);
    let executor = observers.iter().fold(
        ChainExecutor::new(config.executor_config(settings))?,
        |executor, observer| executor.with_observer(Arc::clone(observer)),
    );

    println!("=== RUNNING TASK {}: {} ===", task.number(), task.title());
    executor
        .run(task.chain(settings))
        .with_context(|| format!("Task {} chain failed", task.number()))?;
    println!("\n=== TASK {} DONE ===", task.number());
    Ok(())
}

/// Entry point for the zero-argument task binaries.
pub fn run_standalone(task: Task) -> ExitCode {
    if let Err(err) = configure_tracing() {
        eprintln!("warning: {err}");
    }

    let outcome = ChainConfig::resolve(None).and_then(|config| {
        let observers: Vec<Arc<dyn StageObserver>> =
            vec![Arc::new(ConsoleObserver::stdout()), Arc::new(TracingObserver)];
        run_task(task, &config, &observers)
    });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format_args!("{err:#}"), "Async chain failed");
            eprintln!("Error in async chain: {err:#}");
            ExitCode::FAILURE
        }
    }
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
