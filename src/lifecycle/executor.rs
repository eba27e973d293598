//! Phased lifecycle executor
//!
//! Holds every registered task and drains the phase table in order.

use super::{
    Action, LifecycleError, LifecycleEvent, Phase, PhaseResults, Result, Task, TaskKey,
};
use crate::config::ExecutorConfig;
use crate::outcome::TaskResult;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};

/// Where an executor is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing running; tasks may be registered
    Idle,
    /// Executing the given forward phase
    Running(Phase),
    /// Every forward phase completed
    Drained,
    /// Executing the `exit` phase
    Stopping,
}

struct Execution {
    abort: AbortHandle,
    results: Shared<BoxFuture<'static, Vec<TaskResult>>>,
}

pub(super) struct Inner {
    pub(super) config: ExecutorConfig,
    tasks: DashMap<Phase, Vec<Arc<Task>>>,
    task_keys: DashMap<TaskKey, Weak<Task>>,
    phases: DashMap<Phase, watch::Sender<Option<PhaseResults>>>,
    events: RwLock<broadcast::Sender<LifecycleEvent>>,
    started: AtomicBool,
    generation: Mutex<u64>,
    stopping: tokio::sync::Mutex<()>,
    state: Mutex<LifecycleState>,
    execution: Mutex<Option<Execution>>,
    pub(super) signal_hook: Mutex<Option<JoinHandle<()>>>,
}

/// The lifecycle scheduler
///
/// An `Executor` is a cheap handle; clones share the same registry. Create
/// one in the composition root and hand clones to every collaborator that
/// registers work or waits for a phase.
///
/// # Example
///
/// ```rust,no_run
/// use beanloop::lifecycle::{Action, Executor, Phase};
///
/// # async fn run() {
/// let executor = Executor::new();
/// executor.set_execution(Phase::Init, Action::sync(|| {
///     tracing::info!("warming caches");
///     Ok(())
/// }));
///
/// executor.start_lifecycle();
/// let results = executor.get_execution_phase(Phase::Init).await;
/// assert!(results.iter().all(|r| r.is_ok()));
/// # }
/// ```
#[derive(Clone)]
pub struct Executor {
    pub(super) inner: Arc<Inner>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("state", &self.state())
            .field("tasks", &self.task_count())
            .finish()
    }
}

impl Executor {
    /// Create an executor with the default configuration
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                tasks: DashMap::new(),
                task_keys: DashMap::new(),
                phases: DashMap::new(),
                events: RwLock::new(events),
                started: AtomicBool::new(false),
                generation: Mutex::new(0),
                stopping: tokio::sync::Mutex::new(()),
                state: Mutex::new(LifecycleState::Idle),
                execution: Mutex::new(None),
                signal_hook: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Register a task with the default order (0)
    pub fn set_execution(&self, phase: Phase, action: Action) -> Arc<Task> {
        self.set_execution_with(phase, action, None, 0)
    }

    /// Register a task.
    ///
    /// Tasks sharing an order run concurrently; lower orders run first.
    /// A key makes the task reachable through [`Executor::get_task`]; reusing
    /// a key points it at the newest task. Registering into a phase that has
    /// already run is allowed but the task will not run in this lifecycle.
    pub fn set_execution_with(
        &self,
        phase: Phase,
        action: Action,
        key: Option<TaskKey>,
        order: i32,
    ) -> Arc<Task> {
        let task = Arc::new(Task::new(action, phase, key.clone(), order));
        if let Some(key) = key {
            self.inner.task_keys.insert(key, Arc::downgrade(&task));
        }
        self.inner
            .tasks
            .entry(phase)
            .or_default()
            .push(Arc::clone(&task));
        task
    }

    /// Look up a task by the key it was registered with
    pub fn get_task(&self, key: &TaskKey) -> Option<Arc<Task>> {
        self.inner.task_keys.get(key).and_then(|task| task.upgrade())
    }

    /// Change the order of the task registered under `key`
    pub fn set_order(&self, key: &TaskKey, order: i32) -> Result<()> {
        let task = self
            .get_task(key)
            .ok_or_else(|| LifecycleError::not_registered(key.clone()))?;
        task.set_order(order);
        Ok(())
    }

    /// Number of tasks registered for `phase`
    pub fn phase_task_count(&self, phase: Phase) -> usize {
        self.inner.tasks.get(&phase).map_or(0, |tasks| tasks.len())
    }

    /// Number of tasks registered across all phases
    pub fn task_count(&self) -> usize {
        self.inner.tasks.iter().map(|tasks| tasks.len()).sum()
    }

    /// Receive phase completions and task failures.
    ///
    /// Receivers are closed by [`Executor::stop_lifecycle`]; subscribe again
    /// for the next run.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.read().subscribe()
    }

    /// Wait for a phase to complete and return its results.
    ///
    /// Resolves immediately with the cached results once the phase has run.
    /// Never fails: task failures are entries of the result list. A wait that
    /// is still pending when the lifecycle is stopped never resolves.
    pub async fn get_execution_phase(&self, phase: Phase) -> PhaseResults {
        let mut slot = self.phase_slot(phase);
        let settled = slot
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|results| results.clone());
        match settled {
            Some(results) => results,
            None => std::future::pending().await,
        }
    }

    /// The results of `phase` if it has already completed
    pub fn phase_results(&self, phase: Phase) -> Option<PhaseResults> {
        self.inner
            .phases
            .get(&phase)
            .and_then(|slot| slot.borrow().clone())
    }

    fn phase_slot(&self, phase: Phase) -> watch::Receiver<Option<PhaseResults>> {
        self.inner
            .phases
            .entry(phase)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Start the lifecycle on the next scheduler tick.
    ///
    /// Calling it again while a run is active does nothing. Must be called
    /// from within a tokio runtime.
    pub fn start_lifecycle(&self) {
        let executor = self.clone();
        let run = *self.inner.generation.lock();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            executor.begin_run(run);
        });
    }

    /// Install the forward run `run`, unless it was stopped, a stop is in
    /// progress or another run already started.
    ///
    /// Holds the generation lock throughout, so a concurrent stop either
    /// finds the stored execution or invalidates `run` before it begins.
    fn begin_run(&self, run: u64) {
        let generation = self.inner.generation.lock();
        if *generation != run
            || *self.inner.state.lock() == LifecycleState::Stopping
            || self.inner.started.swap(true, Ordering::SeqCst)
        {
            return;
        }
        tracing::debug!("Starting lifecycle");
        self.install_signal_hook();

        let executor = self.clone();
        let handle = tokio::spawn(async move { executor.execute_run(run).await });
        let abort = handle.abort_handle();
        let results = handle
            .map(|joined| joined.unwrap_or_default())
            .boxed()
            .shared();
        *self.inner.execution.lock() = Some(Execution { abort, results });
        drop(generation);
    }

    /// Wait for the forward run started by [`Executor::start_lifecycle`].
    ///
    /// Returns `None` if no run has been scheduled yet. A run cut short by
    /// [`Executor::stop_lifecycle`] yields an empty or partial list.
    pub async fn execution(&self) -> Option<Vec<TaskResult>> {
        let results = self
            .inner
            .execution
            .lock()
            .as_ref()
            .map(|execution| execution.results.clone())?;
        Some(results.await)
    }

    /// Execute every forward phase in order and return all results.
    pub async fn execute(&self) -> Vec<TaskResult> {
        let run = *self.inner.generation.lock();
        self.execute_run(run).await
    }

    async fn execute_run(&self, run: u64) -> Vec<TaskResult> {
        let mut results = Vec::new();
        for phase in Phase::forward() {
            let entered = self.if_current(run, || {
                self.inner.started.store(true, Ordering::SeqCst);
                *self.inner.state.lock() = LifecycleState::Running(phase);
            });
            let phase_results = match entered {
                Some(()) => self.execute_phase(phase, run).await,
                None => None,
            };
            let Some(phase_results) = phase_results else {
                tracing::debug!(%phase, "Lifecycle run cancelled");
                return results;
            };
            results.extend(phase_results.iter().cloned());
        }

        if self
            .if_current(run, || *self.inner.state.lock() = LifecycleState::Drained)
            .is_some()
        {
            tracing::debug!(tasks = results.len(), "Lifecycle drained");
        }
        results
    }

    /// Run `f` only while `run` is the current generation.
    ///
    /// Stop bumps the generation under the same lock, so nothing `f` writes
    /// can land after a stop has started.
    fn if_current<T>(&self, run: u64, f: impl FnOnce() -> T) -> Option<T> {
        let generation = self.inner.generation.lock();
        (*generation == run).then(f)
    }

    /// Execute one phase of run `run`. Returns `None` once the run is stale,
    /// in which case nothing was published.
    async fn execute_phase(&self, phase: Phase, run: u64) -> Option<PhaseResults> {
        let tasks = self.if_current(run, || {
            self.inner
                .tasks
                .get(&phase)
                .map(|tasks| tasks.clone())
                .unwrap_or_default()
        })?;
        tracing::debug!("Executing phase {} with {} tasks", phase, tasks.len());

        let mut results = Vec::with_capacity(tasks.len());
        for (order, group) in group_by_order(&tasks) {
            self.if_current(run, || ())?;
            tracing::trace!(%phase, order, tasks = group.len(), "Executing order group");
            let pending: Vec<_> = group
                .iter()
                .map(|task| task.action().invoke().into_future())
                .collect();
            results.extend(join_all(pending).await);
        }

        let results: PhaseResults = results.into();
        self.if_current(run, || self.publish(phase, &results))?;
        Some(results)
    }

    /// Log failures, cache the results and notify subscribers
    fn publish(&self, phase: Phase, results: &PhaseResults) {
        for (index, result) in results.iter().enumerate() {
            if let Err(error) = result {
                tracing::error!(%phase, index, "Task {} in phase {} failed: {}", index, phase, error);
                self.emit(LifecycleEvent::TaskFailed {
                    phase,
                    index,
                    error: error.clone(),
                });
            }
        }

        self.inner
            .phases
            .entry(phase)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(Arc::clone(results)));
        self.emit(LifecycleEvent::PhaseCompleted {
            phase,
            results: Arc::clone(results),
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        // No receivers is not an error
        let _ = self.inner.events.read().send(event);
    }

    /// Run the `exit` phase and reset the executor.
    ///
    /// Any forward run still in progress is cancelled first: it finishes at
    /// most the order group it is executing and publishes nothing. Afterwards
    /// all tasks, keys and cached phase results are gone, event receivers are
    /// closed and process hooks removed, so the executor can be started
    /// again from scratch. Concurrent calls are serialized.
    pub async fn stop_lifecycle(&self) {
        let _stopping = self.inner.stopping.lock().await;
        tracing::debug!("Stopping lifecycle");

        let run = {
            let mut generation = self.inner.generation.lock();
            *generation += 1;
            if let Some(execution) = self.inner.execution.lock().take() {
                execution.abort.abort();
            }
            *self.inner.state.lock() = LifecycleState::Stopping;
            *generation
        };
        self.execute_phase(Phase::Exit, run).await;

        {
            // Starts requested while exit was running are dropped as well
            let mut generation = self.inner.generation.lock();
            *generation += 1;
            self.inner.tasks.clear();
            self.inner.task_keys.clear();
            self.inner.phases.clear();
            self.inner.started.store(false, Ordering::SeqCst);
            *self.inner.events.write() = broadcast::channel(self.inner.config.event_capacity).0;
            *self.inner.state.lock() = LifecycleState::Idle;
            self.remove_signal_hook();
        }
        tracing::debug!("Lifecycle stopped");
    }

    /// Start the lifecycle, drive `main` to completion, then stop.
    ///
    /// This is the normal-exit path: the `exit` phase runs once the
    /// application's main future returns.
    pub async fn run_until<F>(&self, main: F) -> F::Output
    where
        F: Future,
    {
        self.start_lifecycle();
        let output = main.await;
        self.stop_lifecycle().await;
        output
    }

    pub(super) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(inner: &Weak<Inner>) -> anyhow::Result<Executor> {
        inner
            .upgrade()
            .map(|inner| Executor { inner })
            .ok_or_else(|| anyhow::anyhow!("Executor dropped before its lifecycle finished"))
    }
}

/// Group tasks by order, ascending, keeping registration order inside a group.
fn group_by_order(tasks: &[Arc<Task>]) -> BTreeMap<i32, Vec<Arc<Task>>> {
    let mut groups: BTreeMap<i32, Vec<Arc<Task>>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.order()).or_default().push(Arc::clone(task));
    }
    groups
}
