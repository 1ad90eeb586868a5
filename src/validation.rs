use serde::Serialize;

use crate::config::{ChainConfig, TaskConfig};

const MAX_REASONABLE_DELAY_MS: u64 = 10_000;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_config(config: &ChainConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.workers == Some(0) {
        report
            .errors
            .push("Worker thread count must be at least 1".into());
    }

    if config.max_blocking_threads == 0 {
        report
            .errors
            .push("max_blocking_threads must be at least 1".into());
    }

    report.merge(validate_task("array", &config.array));
    report.merge(validate_task("differences", &config.differences));

    if config.differences.length == 1 {
        report.warnings.push(
            "differences: a single-element sequence has no consecutive differences; the product will be 0".into(),
        );
    }

    report
}

fn validate_task(label: &str, task: &TaskConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    if task.length == 0 {
        report
            .errors
            .push(format!("{label}: sequence length must be at least 1"));
    }
    if task.low >= task.high {
        report.errors.push(format!(
            "{label}: value range {}..{} is empty",
            task.low, task.high
        ));
    }
    if task.stage_delay_ms > MAX_REASONABLE_DELAY_MS {
        report.warnings.push(format!(
            "{label}: stage delay of {} ms will make every stage very slow",
            task.stage_delay_ms
        ));
    }
    report
}
