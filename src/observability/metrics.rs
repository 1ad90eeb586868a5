use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::{RunSummary, StageEvent, StageObserver};
use crate::error::ChainError;
use crate::pipeline::{RunState, StageInfo};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
    pub workers: BTreeSet<String>,
}

/// Aggregates stage timings across every run it observes. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

impl StageObserver for MetricsCollector {
    fn stage_completed(&self, event: &StageEvent<'_>, _output: &dyn Debug) -> Result<()> {
        if let Ok(mut guard) = self.inner.lock() {
            let metrics = guard.stages.entry(event.stage.name.clone()).or_default();
            metrics.calls += 1;
            let duration_ms = event.elapsed.as_secs_f64() * 1_000.0;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
            metrics.workers.insert(event.worker.to_string());
        }
        Ok(())
    }

    fn stage_failed(&self, _run_id: u64, stage: &StageInfo, _error: &ChainError) -> Result<()> {
        if let Ok(mut guard) = self.inner.lock() {
            guard.stages.entry(stage.name.clone()).or_default().failures += 1;
        }
        Ok(())
    }

    fn run_finished(&self, summary: &RunSummary) -> Result<()> {
        if let Ok(mut guard) = self.inner.lock() {
            match summary.state {
                RunState::Completed => guard.runs_completed += 1,
                _ => guard.runs_failed += 1,
            }
            guard.total_duration_ms += summary.elapsed.as_secs_f64() * 1_000.0;
        }
        Ok(())
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        runs_completed = snapshot.runs_completed,
        runs_failed = snapshot.runs_failed,
        "Chain metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            workers = metrics.workers.len(),
            "Stage metrics"
        );
    }
}
