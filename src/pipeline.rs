use std::any::Any;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span};

use crate::error::{ChainError, panic_message};
use crate::observability::{ObserverSet, RunSummary, StageEvent, StageObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Zero-argument stage that opens the chain.
    Producer,
    Transform,
    /// Consumes its input and yields nothing.
    Consumer,
    /// Ignores its input and yields nothing.
    Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInfo {
    pub index: usize,
    pub name: String,
    pub kind: StageKind,
}

impl StageInfo {
    /// Whether the stage hands a meaningful value to its successor.
    pub fn produces_value(&self) -> bool {
        matches!(self.kind, StageKind::Producer | StageKind::Transform)
    }
}

/// A stage output with its concrete type erased, so that chains of any
/// length are stored and driven as a flat list.
trait StageValue: Debug + Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Debug + Send + 'static> StageValue for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

type Erased = Box<dyn StageValue>;
type StageBody = Box<dyn FnOnce(Erased) -> Result<Erased> + Send>;

/// Boxed `T -> T` stage, used with [`build_chain`] when the stages are
/// distinct closures.
pub type BoxedStage<T> = Box<dyn FnOnce(T) -> Result<T> + Send>;

/// A linear chain of dependent stages that has not been scheduled yet.
///
/// Nothing runs until the chain is handed to [`ChainExecutor::spawn`] or
/// [`ChainExecutor::run`]. Each stage is submitted to the worker pool only
/// once its predecessor has produced a value, and the first failure stops
/// the chain. `T` is the output of the last stage; the builder methods keep
/// every stage's input type equal to its predecessor's output type.
pub struct Chain<T> {
    stages: Vec<StageInfo>,
    bodies: Vec<StageBody>,
    output: PhantomData<fn() -> T>,
}

impl<T> Debug for Chain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl<T: Debug + Send + 'static> Chain<T> {
    pub fn supply<F>(name: impl Into<String>, producer: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let info = StageInfo {
            index: 0,
            name: name.into(),
            kind: StageKind::Producer,
        };
        let body: StageBody = Box::new(move |_seed: Erased| -> Result<Erased> {
            Ok(Box::new(producer()?) as Erased)
        });
        Self {
            stages: vec![info],
            bodies: vec![body],
            output: PhantomData,
        }
    }
}

impl<T: Send + 'static> Chain<T> {
    pub fn then<U, F>(self, name: impl Into<String>, stage: F) -> Chain<U>
    where
        U: Debug + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        self.push(name.into(), StageKind::Transform, stage)
    }

    pub fn then_accept<F>(self, name: impl Into<String>, stage: F) -> Chain<()>
    where
        F: FnOnce(T) -> Result<()> + Send + 'static,
    {
        self.push(name.into(), StageKind::Consumer, stage)
    }

    pub fn then_run<F>(self, name: impl Into<String>, stage: F) -> Chain<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.push(name.into(), StageKind::Action, move |_input: T| stage())
    }

    pub fn stages(&self) -> &[StageInfo] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false: a chain holds at least its producer.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn push<U, F>(self, name: String, kind: StageKind, stage: F) -> Chain<U>
    where
        U: Debug + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let Chain {
            mut stages,
            mut bodies,
            ..
        } = self;
        stages.push(StageInfo {
            index: stages.len(),
            name,
            kind,
        });
        bodies.push(Box::new(move |input: Erased| -> Result<Erased> {
            Ok(Box::new(stage(unerase::<T>(input)?)?) as Erased)
        }));

        Chain {
            stages,
            bodies,
            output: PhantomData,
        }
    }
}

fn unerase<T: 'static>(value: Erased) -> Result<T> {
    value
        .into_any()
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| {
            anyhow!(
                "stage value is not a {}",
                std::any::type_name::<T>()
            )
        })
}

/// Builds a chain from a named producer and an ordered list of same-typed
/// stages. An empty list yields a producer-only chain.
pub fn build_chain<T, P, I, S, F>(producer_name: impl Into<String>, producer: P, stages: I) -> Chain<T>
where
    T: Debug + Send + 'static,
    P: FnOnce() -> Result<T> + Send + 'static,
    I: IntoIterator<Item = (S, F)>,
    S: Into<String>,
    F: FnOnce(T) -> Result<T> + Send + 'static,
{
    stages
        .into_iter()
        .fold(Chain::supply(producer_name, producer), |chain, (name, stage)| {
            chain.then(name, stage)
        })
}

struct RunContext {
    run_id: u64,
    stage_delay: Duration,
    started_at: Instant,
    observers: ObserverSet,
}

impl RunContext {
    fn event<'a>(&self, stage: &'a StageInfo, worker: &'a str, elapsed: Duration) -> StageEvent<'a> {
        StageEvent {
            run_id: self.run_id,
            stage,
            worker,
            elapsed,
            run_elapsed: self.started_at.elapsed(),
        }
    }
}

/// Runs the stages one after another. Stage k+1 is submitted to the pool
/// only after stage k's result has come back, and the first error ends
/// the loop.
async fn drive(
    ctx: &Arc<RunContext>,
    stages: Vec<StageInfo>,
    bodies: Vec<StageBody>,
) -> Result<Erased, ChainError> {
    let mut value: Erased = Box::new(());
    for (stage, body) in stages.into_iter().zip(bodies) {
        value = execute_stage(ctx, stage, body, value).await?;
    }
    Ok(value)
}

async fn execute_stage(
    ctx: &Arc<RunContext>,
    stage: StageInfo,
    body: StageBody,
    input: Erased,
) -> Result<Erased, ChainError> {
    let span = tracing::debug_span!("stage", index = stage.index, name = %stage.name);
    let worker_ctx = Arc::clone(ctx);
    let worker_stage = stage.clone();

    let joined = tokio::task::spawn_blocking(move || -> Result<Erased> {
        let _span_guard = span.enter();
        let worker = worker_label();
        let started_at = Instant::now();
        worker_ctx
            .observers
            .stage_started(&worker_ctx.event(&worker_stage, &worker, Duration::ZERO));

        let output = body(input)?;
        if !worker_ctx.stage_delay.is_zero() {
            thread::sleep(worker_ctx.stage_delay);
        }

        let event = worker_ctx.event(&worker_stage, &worker, started_at.elapsed());
        worker_ctx.observers.stage_completed(&event, &output);
        Ok(output)
    })
    .await;

    let error = match joined {
        Ok(Ok(output)) => return Ok(output),
        Ok(Err(source)) => ChainError::Stage {
            index: stage.index,
            name: stage.name.clone(),
            source,
        },
        Err(err) if err.is_panic() => ChainError::Panicked {
            index: stage.index,
            name: stage.name.clone(),
            message: panic_message(err.into_panic()),
        },
        Err(source) => ChainError::Scheduling {
            index: stage.index,
            name: stage.name.clone(),
            source,
        },
    };
    ctx.observers.stage_failed(ctx.run_id, &stage, &error);
    Err(error)
}

/// Recovers the typed output of the last stage. The builder guarantees the
/// type, so a mismatch is reported as a failure of that stage.
fn finish_output<T: 'static>(last: StageInfo, value: Erased) -> Result<T, ChainError> {
    unerase::<T>(value).map_err(|source| ChainError::Stage {
        index: last.index,
        name: last.name,
        source,
    })
}

fn worker_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Built,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Built,
            1 => RunState::Running,
            2 => RunState::Completed,
            _ => RunState::Failed,
        }
    }
}

#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker threads driving the chains. `None` uses one per core.
    pub worker_threads: Option<usize>,
    /// Upper bound on threads executing stage bodies.
    pub max_blocking_threads: usize,
    /// Pause applied on the worker after every successful stage body.
    pub stage_delay: Duration,
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: 8,
            stage_delay: Duration::ZERO,
            thread_name: "chain-worker".to_string(),
        }
    }
}

/// Owns the shared worker pool and schedules chains onto it.
pub struct ChainExecutor {
    runtime: Runtime,
    config: ExecutorConfig,
    observers: ObserverSet,
    next_run_id: AtomicU64,
}

impl ChainExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self, ChainError> {
        let prefix = config.thread_name.clone();
        let thread_counter = Arc::new(AtomicUsize::new(0));

        let mut builder = Builder::new_multi_thread();
        builder
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name_fn(move || {
                let id = thread_counter.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}-{id}")
            });
        if let Some(workers) = config.worker_threads {
            builder.worker_threads(workers.max(1));
        }
        let runtime = builder.build()?;

        debug!(
            worker_threads = ?config.worker_threads,
            max_blocking_threads = config.max_blocking_threads,
            stage_delay_ms = config.stage_delay.as_millis() as u64,
            "Worker pool started"
        );

        Ok(Self {
            runtime,
            config,
            observers: ObserverSet::default(),
            next_run_id: AtomicU64::new(1),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Schedules the chain immediately and returns the handle of the run.
    pub fn spawn<T: Send + 'static>(&self, chain: Chain<T>) -> ChainHandle<T> {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let Chain { stages, bodies, .. } = chain;
        let stage_count = stages.len();
        let driver_stages = stages.clone();
        let last_stage = driver_stages[stage_count - 1].clone();
        let state = Arc::new(StateCell::default());
        let ctx = Arc::new(RunContext {
            run_id,
            stage_delay: self.config.stage_delay,
            started_at: Instant::now(),
            observers: self.observers.clone(),
        });

        let driver_state = Arc::clone(&state);
        let span = info_span!("chain", run_id, stages = stage_count);
        let task = self.runtime.spawn(
            async move {
                driver_state.set(RunState::Running);
                debug!("Chain started");
                let result = drive(&ctx, driver_stages, bodies)
                    .await
                    .and_then(|value| finish_output::<T>(last_stage, value));
                let outcome = if result.is_ok() {
                    RunState::Completed
                } else {
                    RunState::Failed
                };
                driver_state.set(outcome);
                ctx.observers.run_finished(&RunSummary {
                    run_id,
                    stage_count,
                    state: outcome,
                    elapsed: ctx.started_at.elapsed(),
                });
                result
            }
            .instrument(span),
        );

        ChainHandle {
            run_id,
            started_at: Utc::now(),
            stages,
            state,
            task,
            runtime: self.runtime.handle().clone(),
        }
    }

    /// Schedules the chain and blocks until it completes or fails.
    pub fn run<T: Send + 'static>(&self, chain: Chain<T>) -> Result<T, ChainError> {
        self.spawn(chain).join()
    }
}

/// A scheduled run of a chain.
///
/// [`ChainHandle::join`] is the only blocking call; it consumes the handle,
/// so a finished run can be observed exactly once.
pub struct ChainHandle<T> {
    run_id: u64,
    started_at: DateTime<Utc>,
    stages: Vec<StageInfo>,
    state: Arc<StateCell>,
    task: JoinHandle<Result<T, ChainError>>,
    runtime: Handle,
}

impl<T> Debug for ChainHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainHandle")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T> ChainHandle<T> {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stages(&self) -> &[StageInfo] {
        &self.stages
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Blocks the calling thread until the last stage resolves.
    ///
    /// Panics when called from inside the executor's own async context.
    pub fn join(self) -> Result<T, ChainError> {
        let ChainHandle {
            task,
            runtime,
            state,
            ..
        } = self;
        match runtime.block_on(task) {
            Ok(result) => result,
            Err(source) => {
                state.set(RunState::Failed);
                Err(ChainError::Aborted { source })
            }
        }
    }
}
