//! Registered units of work

use super::Phase;
use crate::outcome::{self, Wrapped};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

type SyncFn = dyn Fn() -> anyhow::Result<()> + Send + Sync;
type AsyncFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// The work a task performs when its phase runs.
///
/// Synchronous actions complete while their order group is being assembled;
/// asynchronous ones are awaited together with the rest of the group.
#[derive(Clone)]
pub enum Action {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Action {
    /// Create an action from a synchronous closure
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Action::Sync(Arc::new(f))
    }

    /// Create an action from a closure returning a future
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Action::Async(Arc::new(move || f().boxed()))
    }

    pub(crate) fn invoke(&self) -> Wrapped<()> {
        match self {
            Action::Sync(f) => Wrapped::Ready(outcome::wrap(|| f())),
            Action::Async(f) => outcome::wrap_async(|| f()),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Sync(_) => f.write_str("Action::Sync"),
            Action::Async(_) => f.write_str("Action::Async"),
        }
    }
}

/// Lookup key for a registered task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey(Cow<'static, str>);

impl TaskKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for TaskKey {
    fn from(key: &'static str) -> Self {
        TaskKey(Cow::Borrowed(key))
    }
}

impl From<String> for TaskKey {
    fn from(key: String) -> Self {
        TaskKey(Cow::Owned(key))
    }
}

/// A unit of work bound to a phase.
///
/// Only the order can change after registration, through
/// [`Task::set_order`]; it is read when the task's phase starts.
#[derive(Debug)]
pub struct Task {
    action: Action,
    phase: Phase,
    order: AtomicI32,
    key: Option<TaskKey>,
}

impl Task {
    pub(crate) fn new(action: Action, phase: Phase, key: Option<TaskKey>, order: i32) -> Self {
        Self {
            action,
            phase,
            order: AtomicI32::new(order),
            key,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn order(&self) -> i32 {
        self.order.load(Ordering::Acquire)
    }

    /// Move the task to another order group within its phase
    pub fn set_order(&self, order: i32) {
        self.order.store(order, Ordering::Release);
    }

    pub fn key(&self) -> Option<&TaskKey> {
        self.key.as_ref()
    }

    pub(crate) fn action(&self) -> &Action {
        &self.action
    }
}
