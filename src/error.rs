use crate::lifecycle::{LifecycleError, Phase};
use crate::outcome::TaskError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BeanloopError>;

#[derive(Debug, Error)]
pub enum BeanloopError {
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("Lifecycle phase {phase} failed: {source}")]
    Startup {
        phase: Phase,
        #[source]
        source: TaskError,
    },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Error type for route handlers
///
/// Anything convertible into `anyhow::Error` can be returned with `?`; the
/// client receives a plain `500 Internal Server Error`.
#[derive(Debug)]
pub struct RouteError(anyhow::Error);

impl<E> From<E> for RouteError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl axum::response::IntoResponse for RouteError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %format!("{:#}", self.0), "Route handler failed");
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
        )
            .into_response()
    }
}
