use std::sync::Arc;

use stage_chain::config::ChainConfig;
use stage_chain::observability::{MetricsCollector, StageObserver};
use stage_chain::tasks::{Task, array, differences, run_task};
use stage_chain::{ChainError, ChainExecutor, ExecutorConfig};

fn executor() -> ChainExecutor {
    ChainExecutor::new(ExecutorConfig::default()).unwrap()
}

fn quick_config() -> ChainConfig {
    let mut config = ChainConfig::default();
    for task in Task::ALL {
        let settings = task.settings_mut(&mut config);
        settings.stage_delay_ms = 0;
        settings.seed = Some(11);
    }
    config
}

#[test]
fn add_ten_then_halve() {
    let result = executor()
        .run(array::transform_chain(vec![1, 2, 3]))
        .unwrap();
    assert_eq!(result, vec![5.5, 6.0, 6.5]);
}

#[test]
fn array_chain_fails_on_overflow() {
    let err = executor()
        .run(array::transform_chain(vec![i32::MAX]))
        .unwrap_err();
    assert_eq!(err.stage_index(), Some(1));
    assert_eq!(err.stage_name(), Some("add-ten"));
}

#[test]
fn overflowing_task_stops_before_presentation_stages() {
    let mut config = quick_config();
    config.array.length = 4;
    config.array.low = i32::MAX - 5;
    config.array.high = i32::MAX;
    let collector = MetricsCollector::new();
    let observers: Vec<Arc<dyn StageObserver>> = vec![Arc::new(collector.clone())];

    let err = run_task(Task::Array, &config, &observers).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.starts_with("Task 1 chain failed: stage 1 ('add-ten') failed: adding 10 to"));
    assert_eq!(message.matches("overflows i32").count(), 1);
    let chain_err = err.downcast_ref::<ChainError>().unwrap();
    assert_eq!(chain_err.stage_name(), Some("add-ten"));

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.runs_failed, 1);
    assert_eq!(snapshot.runs_completed, 0);
    assert_eq!(snapshot.stages["add-ten"].failures, 1);
    for skipped in ["halve", "display", "finish"] {
        assert!(!snapshot.stages.contains_key(skipped), "{skipped} ran");
    }
}

#[test]
fn product_of_consecutive_differences() {
    let product = executor()
        .run(differences::product_chain(vec![2.0, 5.0, 1.0]))
        .unwrap();
    assert_eq!(product, -12.0);
}

#[test]
fn task_chains_have_expected_stages() {
    let config = ChainConfig::default();
    let names = |task: Task| -> Vec<String> {
        task.chain(task.settings(&config))
            .stages()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    };

    assert_eq!(
        names(Task::Array),
        ["generate", "add-ten", "halve", "display", "finish"]
    );
    assert_eq!(
        names(Task::Differences),
        ["generate-sequence", "product-of-differences", "display"]
    );
}

#[test]
fn both_tasks_complete_without_delay() {
    let config = quick_config();
    let collector = MetricsCollector::new();
    let observers: Vec<Arc<dyn StageObserver>> = vec![Arc::new(collector.clone())];

    for task in Task::ALL {
        run_task(task, &config, &observers).unwrap();
    }

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.runs_completed, 2);
    assert_eq!(snapshot.runs_failed, 0);
    assert_eq!(snapshot.stages["generate"].calls, 1);
    assert_eq!(snapshot.stages["finish"].calls, 1);
    assert_eq!(snapshot.stages["product-of-differences"].calls, 1);
    // both chains end with a "display" stage
    assert_eq!(snapshot.stages["display"].calls, 2);
}
