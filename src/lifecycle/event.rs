//! Events published by the executor

use super::Phase;
use crate::outcome::{TaskError, TaskResult};
use std::sync::Arc;

/// The settled results of one phase, in order-group order.
pub type PhaseResults = Arc<[TaskResult]>;

/// Notifications sent to [`Executor::subscribe`](super::Executor::subscribe) receivers.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Every task of the phase settled
    PhaseCompleted { phase: Phase, results: PhaseResults },
    /// A task failed; sent once per failure, before the phase completes
    TaskFailed {
        phase: Phase,
        index: usize,
        error: TaskError,
    },
}

impl LifecycleEvent {
    pub fn phase(&self) -> Phase {
        match self {
            LifecycleEvent::PhaseCompleted { phase, .. } => *phase,
            LifecycleEvent::TaskFailed { phase, .. } => *phase,
        }
    }

    /// The failure carried by a `TaskFailed` event
    pub fn error(&self) -> Option<&TaskError> {
        match self {
            LifecycleEvent::TaskFailed { error, .. } => Some(error),
            LifecycleEvent::PhaseCompleted { .. } => None,
        }
    }
}

/// The first failure in a phase's results, if any
pub fn first_failure(results: &[TaskResult]) -> Option<&TaskError> {
    results.iter().find_map(|result| result.as_ref().err())
}
