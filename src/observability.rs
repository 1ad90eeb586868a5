use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::error::ChainError;
use crate::pipeline::{RunState, StageInfo};

pub mod console;
pub mod metrics;

pub use console::ConsoleObserver;
pub use metrics::{MetricsCollector, MetricsSnapshot, StageMetrics, log_snapshot};

/// Progress of one stage inside one run.
#[derive(Debug, Clone, Copy)]
pub struct StageEvent<'a> {
    pub run_id: u64,
    pub stage: &'a StageInfo,
    /// Name of the worker thread executing the stage body.
    pub worker: &'a str,
    /// Time spent in the stage so far, zero when the stage starts.
    pub elapsed: Duration,
    /// Time since the run was scheduled.
    pub run_elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: u64,
    pub stage_count: usize,
    pub state: RunState,
    pub elapsed: Duration,
}

/// Side channel notified as a chain advances.
///
/// Hooks are called from worker threads. An error returned from a hook is
/// logged and dropped; it never fails the stage that triggered it.
pub trait StageObserver: Send + Sync {
    fn stage_started(&self, _event: &StageEvent<'_>) -> Result<()> {
        Ok(())
    }

    fn stage_completed(&self, _event: &StageEvent<'_>, _output: &dyn Debug) -> Result<()> {
        Ok(())
    }

    fn stage_failed(&self, _run_id: u64, _stage: &StageInfo, _error: &ChainError) -> Result<()> {
        Ok(())
    }

    fn run_finished(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct ObserverSet {
    observers: Vec<Arc<dyn StageObserver>>,
}

impl ObserverSet {
    pub(crate) fn push(&mut self, observer: Arc<dyn StageObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn stage_started(&self, event: &StageEvent<'_>) {
        self.notify("stage_started", |observer| observer.stage_started(event));
    }

    pub(crate) fn stage_completed(&self, event: &StageEvent<'_>, output: &dyn Debug) {
        self.notify("stage_completed", |observer| {
            observer.stage_completed(event, output)
        });
    }

    pub(crate) fn stage_failed(&self, run_id: u64, stage: &StageInfo, error: &ChainError) {
        self.notify("stage_failed", |observer| {
            observer.stage_failed(run_id, stage, error)
        });
    }

    pub(crate) fn run_finished(&self, summary: &RunSummary) {
        self.notify("run_finished", |observer| observer.run_finished(summary));
    }

    fn notify<F>(&self, hook: &'static str, call: F)
    where
        F: Fn(&dyn StageObserver) -> Result<()>,
    {
        for observer in &self.observers {
            match catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(hook, error = %err, "Stage observer failed"),
                Err(_) => warn!(hook, "Stage observer panicked"),
            }
        }
    }
}

/// Emits one structured event per stage transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn stage_started(&self, event: &StageEvent<'_>) -> Result<()> {
        debug!(
            run_id = event.run_id,
            index = event.stage.index,
            stage = event.stage.name.as_str(),
            worker = event.worker,
            "Stage started"
        );
        Ok(())
    }

    fn stage_completed(&self, event: &StageEvent<'_>, output: &dyn Debug) -> Result<()> {
        debug!(
            run_id = event.run_id,
            index = event.stage.index,
            stage = event.stage.name.as_str(),
            worker = event.worker,
            duration_ms = event.elapsed.as_secs_f64() * 1_000.0,
            output = ?output,
            "Stage completed"
        );
        Ok(())
    }

    fn stage_failed(&self, run_id: u64, stage: &StageInfo, error: &ChainError) -> Result<()> {
        warn!(
            run_id,
            index = stage.index,
            stage = stage.name.as_str(),
            error = %error.describe(),
            "Stage failed"
        );
        Ok(())
    }

    fn run_finished(&self, summary: &RunSummary) -> Result<()> {
        info!(
            run_id = summary.run_id,
            stages = summary.stage_count,
            state = ?summary.state,
            duration_ms = summary.elapsed.as_secs_f64() * 1_000.0,
            "Chain finished"
        );
        Ok(())
    }
}

/// Installs the global subscriber. Logs go to stderr so that stage progress
/// on stdout stays readable. `RUST_LOG` overrides the default `info` filter.
pub fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(())
}
