//! Hook registration
//!
//! Helpers that register work on behalf of beans. Most of them register in
//! two steps: an early phase task registers the real hook, which keeps the
//! hook adjustable (see [`Executor::order`]) until its phase starts.

use super::{Action, Executor, Phase, TaskKey};
use async_trait::async_trait;
use std::sync::Arc;

/// Called during the `init` phase, after routes are registered
///
/// Use this hook to:
/// - Open connections
/// - Warm up caches
/// - Validate configuration of injected beans
///
/// # Example
///
/// ```rust,ignore
/// use beanloop::lifecycle::Setup;
/// use async_trait::async_trait;
///
/// #[async_trait]
/// impl Setup for DatabaseService {
///     async fn setup(&self) -> anyhow::Result<()> {
///         self.pool.connect().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Setup: Send + Sync {
    async fn setup(&self) -> anyhow::Result<()>;
}

/// Called during the `exit` phase
///
/// Use this hook to close connections, flush buffers and release
/// anything acquired in [`Setup`].
#[async_trait]
pub trait Shutdown: Send + Sync {
    async fn shutdown(&self) -> anyhow::Result<()>;
}

impl Executor {
    /// Hook an action to `phase` under `key`.
    ///
    /// The action is registered by a `start` task, so a later
    /// [`Executor::order`] call for the same key still applies to it.
    pub fn hook(&self, phase: Phase, key: impl Into<TaskKey>, action: Action) {
        let key = key.into();
        tracing::debug!("Registering {} function {}", phase, key);
        let executor = self.downgrade();
        self.set_execution(
            Phase::Start,
            Action::sync(move || {
                tracing::debug!("Initializing {} as {} function", key, phase);
                Executor::upgrade(&executor)?.set_execution_with(
                    phase,
                    action.clone(),
                    Some(key.clone()),
                    0,
                );
                Ok(())
            }),
        );
    }

    /// Assign an execution order to the hook registered under `key`.
    ///
    /// Applied during the `register` phase. An unknown key fails that task
    /// with [`LifecycleError::TaskNotRegistered`](super::LifecycleError).
    pub fn order(&self, key: impl Into<TaskKey>, order: i32) {
        let key = key.into();
        let executor = self.downgrade();
        self.set_execution(
            Phase::Register,
            Action::sync(move || {
                Executor::upgrade(&executor)?.set_order(&key, order)?;
                Ok(())
            }),
        );
    }

    /// Run an action right before the lifecycle stops.
    ///
    /// Registered during `routing`; stopping earlier skips it.
    pub fn on_shutdown(&self, action: Action) {
        let executor = self.downgrade();
        self.set_execution(
            Phase::Routing,
            Action::sync(move || {
                Executor::upgrade(&executor)?.set_execution(Phase::Exit, action.clone());
                Ok(())
            }),
        );
    }

    /// Hook a bean's [`Setup`] into the `init` phase
    pub fn register_setup<T>(&self, bean: Arc<T>, key: impl Into<TaskKey>)
    where
        T: Setup + 'static,
    {
        self.hook(
            Phase::Init,
            key,
            Action::from_async(move || {
                let bean = Arc::clone(&bean);
                async move { bean.setup().await }
            }),
        );
    }

    /// Hook a bean's [`Shutdown`] into the `exit` phase
    pub fn register_shutdown<T>(&self, bean: Arc<T>)
    where
        T: Shutdown + 'static,
    {
        self.on_shutdown(Action::from_async(move || {
            let bean = Arc::clone(&bean);
            async move { bean.shutdown().await }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ExecutorConfig, LifecycleError, LifecycleEvent};
    use super::*;
    use parking_lot::Mutex;

    fn executor() -> Executor {
        Executor::with_config(ExecutorConfig::detached())
    }

    struct Bean {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Setup for Bean {
        async fn setup(&self) -> anyhow::Result<()> {
            tokio::task::yield_now().await;
            self.calls.lock().push(format!("{} setup", self.name));
            Ok(())
        }
    }

    #[async_trait]
    impl Shutdown for Bean {
        async fn shutdown(&self) -> anyhow::Result<()> {
            self.calls.lock().push(format!("{} shutdown", self.name));
            Ok(())
        }
    }

    fn bean(name: &'static str, calls: &Arc<Mutex<Vec<String>>>) -> Arc<Bean> {
        Arc::new(Bean {
            name,
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn test_hook_runs_in_target_phase() {
        let executor = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        executor.register_setup(bean("database", &calls), "Database::setup");

        executor.start_lifecycle();
        executor.get_execution_phase(Phase::Start).await;
        assert!(executor.get_task(&"Database::setup".into()).is_some());

        let results = executor.get_execution_phase(Phase::Init).await;
        assert_eq!(results.len(), 1);
        assert_eq!(*calls.lock(), vec!["database setup"]);
    }

    #[tokio::test]
    async fn test_order_sequences_setup_hooks() {
        let executor = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        executor.register_setup(bean("cache", &calls), "Cache::setup");
        executor.register_setup(bean("database", &calls), "Database::setup");
        executor.register_setup(bean("metrics", &calls), "Metrics::setup");
        executor.order("Cache::setup", 2);
        executor.order("Database::setup", -1);
        executor.order("Metrics::setup", 1);

        executor.start_lifecycle();
        executor.get_execution_phase(Phase::Init).await;

        assert_eq!(
            *calls.lock(),
            vec!["database setup", "metrics setup", "cache setup"]
        );
    }

    #[tokio::test]
    async fn test_order_for_unknown_key_fails_register_task() {
        let executor = executor();
        let mut events = executor.subscribe();
        executor.order("Nobody::setup", 3);

        executor.start_lifecycle();
        let results = executor.get_execution_phase(Phase::Register).await;

        let error = results[0].as_ref().unwrap_err();
        assert!(matches!(
            error.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::TaskNotRegistered { .. })
        ));

        let failed = loop {
            match events.recv().await.unwrap() {
                event @ LifecycleEvent::TaskFailed { .. } => break event,
                _ => continue,
            }
        };
        assert_eq!(failed.phase(), Phase::Register);
        assert!(failed.error().unwrap().ptr_eq(error));
    }

    #[tokio::test]
    async fn test_shutdown_hook_runs_on_stop() {
        let executor = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let database = bean("database", &calls);
        executor.register_setup(Arc::clone(&database), "Database::setup");
        executor.register_shutdown(database);

        executor.start_lifecycle();
        executor.get_execution_phase(Phase::Run).await;
        assert_eq!(executor.phase_task_count(Phase::Exit), 1);
        executor.stop_lifecycle().await;

        assert_eq!(*calls.lock(), vec!["database setup", "database shutdown"]);
    }

    #[tokio::test]
    async fn test_shutdown_hook_skipped_before_routing() {
        let executor = executor();
        let calls = Arc::new(Mutex::new(Vec::new()));
        executor.register_shutdown(bean("database", &calls));

        executor.stop_lifecycle().await;

        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_hook_helpers_do_not_keep_executor_alive() {
        let executor = executor();
        let inner = executor.downgrade();
        executor.hook(Phase::Init, "Cache::warm", Action::sync(|| Ok(())));
        executor.order("Cache::warm", 1);
        executor.on_shutdown(Action::sync(|| Ok(())));
        assert_eq!(executor.task_count(), 3);

        drop(executor);
        assert!(inner.upgrade().is_none());
    }
}
