use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pipeline::ExecutorConfig;

pub const CONFIG_ENV: &str = "STAGE_CHAIN_CONFIG";
pub const WORKERS_ENV: &str = "STAGE_CHAIN_WORKERS";
pub const DELAY_ENV: &str = "STAGE_CHAIN_DELAY_MS";
pub const SEED_ENV: &str = "STAGE_CHAIN_SEED";

/// Effective settings. A YAML file only lists what it changes; every task
/// block is merged onto that task's own defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "ConfigFile")]
pub struct ChainConfig {
    pub workers: Option<usize>,
    pub max_blocking_threads: usize,
    pub array: TaskConfig,
    pub differences: TaskConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_blocking_threads: 8,
            array: TaskConfig {
                length: 10,
                stage_delay_ms: 200,
                seed: None,
                low: 0,
                high: 100,
            },
            differences: TaskConfig {
                length: 20,
                stage_delay_ms: 300,
                seed: None,
                low: 0,
                high: 10,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub length: usize,
    pub stage_delay_ms: u64,
    pub seed: Option<u64>,
    /// Inclusive lower bound of generated values.
    pub low: i32,
    /// Exclusive upper bound of generated values.
    pub high: i32,
}

impl TaskConfig {
    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.stage_delay_ms)
    }

    pub fn value_range(&self) -> Range<i32> {
        self.low..self.high
    }
}

/// Partial task settings, as written in a config file or given on the
/// command line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskOverrides {
    pub length: Option<usize>,
    pub stage_delay_ms: Option<u64>,
    pub seed: Option<u64>,
    pub low: Option<i32>,
    pub high: Option<i32>,
}

impl TaskOverrides {
    pub fn apply(&self, task: &mut TaskConfig) {
        if let Some(length) = self.length {
            task.length = length;
        }
        if let Some(delay) = self.stage_delay_ms {
            task.stage_delay_ms = delay;
        }
        if let Some(seed) = self.seed {
            task.seed = Some(seed);
        }
        if let Some(low) = self.low {
            task.low = low;
        }
        if let Some(high) = self.high {
            task.high = high;
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    workers: Option<usize>,
    max_blocking_threads: Option<usize>,
    array: TaskOverrides,
    differences: TaskOverrides,
}

impl From<ConfigFile> for ChainConfig {
    fn from(file: ConfigFile) -> Self {
        let mut config = ChainConfig {
            workers: file.workers,
            ..ChainConfig::default()
        };
        if let Some(max_blocking_threads) = file.max_blocking_threads {
            config.max_blocking_threads = max_blocking_threads;
        }
        file.array.apply(&mut config.array);
        file.differences.apply(&mut config.differences);
        config
    }
}

impl ChainConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ChainConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?;
        Ok(config)
    }

    /// Loads `path`, or the file named by `STAGE_CHAIN_CONFIG` when no path
    /// is given, otherwise starts from defaults. Environment overrides are
    /// applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let mut config = match path.or(env_path.as_deref()) {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = parse_override::<usize>(&lookup, WORKERS_ENV)? {
            self.workers = Some(workers);
        }
        if let Some(delay) = parse_override::<u64>(&lookup, DELAY_ENV)? {
            self.array.stage_delay_ms = delay;
            self.differences.stage_delay_ms = delay;
        }
        if let Some(seed) = parse_override::<u64>(&lookup, SEED_ENV)? {
            self.array.seed = Some(seed);
            self.differences.seed = Some(seed);
        }
        Ok(())
    }

    pub fn executor_config(&self, task: &TaskConfig) -> ExecutorConfig {
        ExecutorConfig {
            worker_threads: self.workers,
            max_blocking_threads: self.max_blocking_threads,
            stage_delay: task.stage_delay(),
            ..ExecutorConfig::default()
        }
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain.yaml");
        std::fs::write(
            &path,
            "workers: 2\ndifferences:\n  length: 5\n  seed: 42\n",
        )
        .unwrap();

        let config = ChainConfig::load(&path).unwrap();
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.max_blocking_threads, 8);
        assert_eq!(config.array.length, 10);
        assert_eq!(config.array.stage_delay_ms, 200);
        assert_eq!(config.differences.length, 5);
        assert_eq!(config.differences.stage_delay_ms, 300);
        assert_eq!(config.differences.seed, Some(42));
        assert_eq!(config.differences.value_range(), 0..10);
    }

    #[test]
    fn task_block_overrides_only_listed_keys() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain.yaml");
        std::fs::write(
            &path,
            "array:\n  stage_delay_ms: 0\n  low: -50\ndifferences:\n  high: 4\n",
        )
        .unwrap();

        let config = ChainConfig::load(&path).unwrap();
        assert_eq!(config.array.length, 10);
        assert_eq!(config.array.stage_delay_ms, 0);
        assert_eq!(config.array.value_range(), -50..100);
        assert_eq!(config.differences.length, 20);
        assert_eq!(config.differences.stage_delay_ms, 300);
        assert_eq!(config.differences.value_range(), 0..4);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("chain.yaml");
        std::fs::write(&path, "wokers: 2\n").unwrap();

        let err = ChainConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config YAML"));

        std::fs::write(&path, "array:\n  lenght: 3\n").unwrap();
        assert!(ChainConfig::load(&path).is_err());
    }

    #[test]
    fn overrides_apply_to_both_tasks() {
        let env: HashMap<&str, &str> = HashMap::from([
            (WORKERS_ENV, "3"),
            (DELAY_ENV, "0"),
            (SEED_ENV, " 7 "),
        ]);
        let mut config = ChainConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.workers, Some(3));
        assert_eq!(config.array.stage_delay_ms, 0);
        assert_eq!(config.differences.stage_delay_ms, 0);
        assert_eq!(config.array.seed, Some(7));
        assert_eq!(config.differences.seed, Some(7));
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut config = ChainConfig::default();
        let err = config
            .apply_overrides(|key| (key == WORKERS_ENV).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(WORKERS_ENV));
    }

    #[test]
    fn executor_config_uses_task_delay() {
        let config = ChainConfig::default();
        let executor = config.executor_config(&config.differences);
        assert_eq!(executor.stage_delay, Duration::from_millis(300));
        assert_eq!(executor.max_blocking_threads, 8);
        assert_eq!(executor.worker_threads, None);
    }
}
