//! Lifecycle-specific error types

use super::TaskKey;
use thiserror::Error;

/// Errors raised by callers of the executor
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No task was registered under the given key
    #[error("Task not registered for execution: {key}")]
    TaskNotRegistered {
        /// The key that was looked up
        key: TaskKey,
    },
}

impl LifecycleError {
    /// Create a missing-registration error
    pub fn not_registered(key: impl Into<TaskKey>) -> Self {
        Self::TaskNotRegistered { key: key.into() }
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
