//! Task outcomes
//!
//! Every lifecycle task runs through [`wrap`] or [`wrap_async`], which turn a
//! fallible (and possibly panicking) call into a [`TaskResult`]. A failing task
//! therefore never tears down the phase it runs in: the executor always gets a
//! full list of results back and decides what to report.
//!
//! # Example
//!
//! ```rust
//! use beanloop::outcome::{wrap, TaskError};
//!
//! let ok = wrap(|| Ok::<_, TaskError>(42));
//! assert_eq!(ok.unwrap(), 42);
//!
//! let failed = wrap(|| -> Result<(), TaskError> { panic!("x") });
//! assert_eq!(failed.unwrap_err().to_string(), "x");
//! ```

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use std::any::Any;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Result of a wrapped call. Tasks use the default `()` value.
pub type TaskResult<T = ()> = Result<T, TaskError>;

/// A cloneable, shareable task failure.
///
/// Clones point at the same underlying error, so the value stored in a phase
/// result list, the one carried by a `TaskFailed` event and the one re-raised
/// by [`unwrap`] are all the same error (see [`TaskError::ptr_eq`]).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0:#}")]
pub struct TaskError(Arc<anyhow::Error>);

impl TaskError {
    /// Create an error from a plain message
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Normalize a panic payload into an error.
    ///
    /// A payload that already is a `TaskError` (see [`unwrap`]) is returned
    /// unchanged; string payloads become the error message.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<TaskError>() {
            Ok(error) => return *error,
            Err(payload) => payload,
        };
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked with a non-string payload".to_string()
        };
        Self::msg(message)
    }

    /// Returns true if both values refer to the same failure
    pub fn ptr_eq(&self, other: &TaskError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Attempt to downcast the underlying error to a concrete type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Borrow the underlying `anyhow` error
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

/// The outcome of [`wrap_async`].
///
/// Calls that fail before producing a future resolve on the spot
/// (`Ready`); everything else is awaited (`Pending`).
pub enum Wrapped<T> {
    Ready(TaskResult<T>),
    Pending(BoxFuture<'static, TaskResult<T>>),
}

impl<T> Wrapped<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Wrapped::Ready(_))
    }

    /// Take the result if it is already available
    pub fn into_ready(self) -> Option<TaskResult<T>> {
        match self {
            Wrapped::Ready(result) => Some(result),
            Wrapped::Pending(_) => None,
        }
    }
}

impl<T: Send + 'static> IntoFuture for Wrapped<T> {
    type Output = TaskResult<T>;
    type IntoFuture = BoxFuture<'static, TaskResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Wrapped::Ready(result) => future::ready(result).boxed(),
            Wrapped::Pending(pending) => pending,
        }
    }
}

impl<T> std::fmt::Debug for Wrapped<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wrapped::Ready(result) => f
                .debug_tuple("Ready")
                .field(&result.as_ref().map(|_| ()))
                .finish(),
            Wrapped::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Invoke a synchronous call, capturing both returned errors and panics.
pub fn wrap<T, E, F>(f: F) -> TaskResult<T>
where
    F: FnOnce() -> Result<T, E>,
    E: Into<TaskError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(Into::into),
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}

/// Invoke a call producing a future.
///
/// The call itself runs immediately. If it panics before a future exists the
/// failure is returned as [`Wrapped::Ready`]; otherwise the future is wrapped
/// so that errors and panics raised while polling become a failed result.
pub fn wrap_async<T, E, F, Fut>(f: F) -> Wrapped<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<TaskError> + 'static,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(pending) => Wrapped::Pending(
            AssertUnwindSafe(pending)
                .catch_unwind()
                .map(|caught| match caught {
                    Ok(result) => result.map_err(Into::into),
                    Err(payload) => Err(TaskError::from_panic(payload)),
                })
                .boxed(),
        ),
        Err(payload) => Wrapped::Ready(Err(TaskError::from_panic(payload))),
    }
}

/// Return the value, or unwind with the original [`TaskError`] as payload.
///
/// A later [`wrap`] around the unwinding call recovers the very same error.
pub fn unwrap<T>(result: TaskResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic::panic_any(error),
    }
}

/// Async counterpart of [`unwrap`]
pub async fn unwrap_async<T, Fut>(result: Fut) -> T
where
    Fut: IntoFuture<Output = TaskResult<T>>,
{
    unwrap(result.await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_returns_value() {
        let result = wrap(|| Ok::<_, TaskError>("value"));
        assert_eq!(result.unwrap(), "value");
    }

    #[test]
    fn test_wrap_preserves_error_identity() {
        let error = TaskError::msg("boom");
        let returned = error.clone();

        let result = wrap(move || Err::<(), _>(returned));

        let caught = result.unwrap_err();
        assert!(caught.ptr_eq(&error));
        assert_eq!(caught.to_string(), "boom");
    }

    #[test]
    fn test_wrap_converts_anyhow_errors() {
        let result = wrap(|| -> anyhow::Result<()> { anyhow::bail!("bad input") });
        assert_eq!(result.unwrap_err().to_string(), "bad input");
    }

    #[test]
    fn test_wrap_normalizes_str_panic() {
        let result = wrap(|| -> Result<(), TaskError> { panic!("x") });
        assert_eq!(result.unwrap_err().to_string(), "x");
    }

    #[test]
    fn test_wrap_normalizes_string_panic() {
        let result = wrap(|| -> Result<(), TaskError> { panic!("{} failed", "setup") });
        assert_eq!(result.unwrap_err().to_string(), "setup failed");
    }

    #[test]
    fn test_wrap_normalizes_opaque_panic() {
        let result = wrap(|| -> Result<(), TaskError> { panic::panic_any(7_u32) });
        assert_eq!(
            result.unwrap_err().to_string(),
            "task panicked with a non-string payload"
        );
    }

    #[test]
    fn test_wrap_async_panicking_call_is_ready() {
        let wrapped = wrap_async(|| -> futures::future::Ready<Result<(), TaskError>> {
            panic!("before future")
        });

        assert!(wrapped.is_ready());
        let error = wrapped.into_ready().unwrap().unwrap_err();
        assert_eq!(error.to_string(), "before future");
    }

    #[tokio::test]
    async fn test_wrap_async_resolves_value() {
        let wrapped = wrap_async(|| async { Ok::<_, TaskError>(5) });

        assert!(!wrapped.is_ready());
        assert_eq!(wrapped.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_wrap_async_captures_rejection() {
        let wrapped = wrap_async(|| async { Err::<(), _>(anyhow::anyhow!("rejected")) });
        assert_eq!(wrapped.await.unwrap_err().to_string(), "rejected");
    }

    #[tokio::test]
    async fn test_wrap_async_captures_panic_while_polling() {
        let wrapped = wrap_async(|| async {
            tokio::task::yield_now().await;
            if true {
                panic!("mid-flight");
            }
            Ok::<(), TaskError>(())
        });

        assert_eq!(wrapped.await.unwrap_err().to_string(), "mid-flight");
    }

    #[test]
    fn test_unwrap_returns_value() {
        assert_eq!(unwrap(Ok::<_, TaskError>(3)), 3);
    }

    #[test]
    fn test_unwrap_rethrows_same_error() {
        let error = TaskError::msg("original");
        let thrown = error.clone();

        let payload = panic::catch_unwind(AssertUnwindSafe(move || unwrap::<()>(Err(thrown))))
            .unwrap_err();

        let rethrown = payload.downcast::<TaskError>().unwrap();
        assert!(rethrown.ptr_eq(&error));
    }

    #[test]
    fn test_wrap_recovers_unwrapped_error() {
        let error = TaskError::msg("round trip");
        let thrown = error.clone();

        let result = wrap(move || Ok::<(), TaskError>(unwrap(Err(thrown))));

        assert!(result.unwrap_err().ptr_eq(&error));
    }

    #[tokio::test]
    async fn test_unwrap_async_returns_value() {
        let value = unwrap_async(wrap_async(|| async { Ok::<_, TaskError>("done") })).await;
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn test_unwrap_async_rethrows_same_error() {
        let error = TaskError::msg("connection reset");
        let thrown = error.clone();

        let payload = AssertUnwindSafe(unwrap_async(wrap_async(move || async move {
            Err::<(), _>(thrown)
        })))
        .catch_unwind()
        .await
        .unwrap_err();

        let rethrown = payload.downcast::<TaskError>().unwrap();
        assert!(rethrown.ptr_eq(&error));
    }
}
