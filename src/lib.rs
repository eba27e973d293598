//! # Beanloop
//!
//! A phased lifecycle executor for bean-style applications on top of axum.
//!
//! Beanloop drives an application through a fixed sequence of phases
//! (`start → register → routing → init → run`, and `exit` on shutdown).
//! Collaborators register tasks for a phase at any time before it runs;
//! the executor runs each phase's tasks grouped by order, collects every
//! result and lets other code wait for a phase to complete.
//!
//! ## Features
//!
//! - **Phased lifecycle**: strict ordering across phases, concurrency within
//!   an order group
//! - **Failure isolation**: task errors and panics become results and events,
//!   never aborted phases
//! - **Hooks**: `Setup` / `Shutdown` beans and order adjustments by key
//! - **Graceful shutdown**: SIGINT/SIGTERM run the `exit` phase
//! - **HTTP bootstrap**: router beans mounted during `routing`, served during `run`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beanloop::prelude::*;
//!
//! struct HelloRouter;
//!
//! impl RouterBean for HelloRouter {
//!     fn path(&self) -> &str {
//!         "/hello"
//!     }
//!
//!     fn router(self: Arc<Self>) -> Router {
//!         Router::new().route("/", axum::routing::get(|| async { "hello" }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> beanloop::Result<()> {
//!     let config = ConfigService::new();
//!     beanloop::logging::init_logging(&config)?;
//!
//!     let executor = Executor::with_config(ExecutorConfig::from_config(&config)?);
//!     executor.set_execution(Phase::Init, Action::sync(|| {
//!         tracing::info!("setting up");
//!         Ok(())
//!     }));
//!
//!     let _app = Application::create(
//!         Application::builder()
//!             .executor(executor)
//!             .config(AppConfig::from_config(&config)?)
//!             .router_bean(Arc::new(HelloRouter)),
//!     )
//!     .await?;
//!
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod outcome;

// Re-export core types
pub use application::{Application, ApplicationBuilder, RouterBean};
pub use config::{AppConfig, ConfigService, ExecutorConfig};
pub use error::{BeanloopError, Result, RouteError};
pub use lifecycle::{Action, Executor, LifecycleEvent, Phase, PhaseResults, Task, TaskKey};
pub use outcome::{TaskError, TaskResult};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use beanloop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::application::{Application, ApplicationBuilder, RouterBean};
    pub use crate::cache::Cached;
    pub use crate::config::{AppConfig, ConfigService, ExecutorConfig};
    pub use crate::error::{BeanloopError, Result, RouteError};
    pub use crate::lifecycle::{
        Action, Executor, LifecycleError, LifecycleEvent, LifecycleState, Phase, PhaseResults,
        Setup, Shutdown, Task, TaskKey, shutdown_signal,
    };
    pub use crate::outcome::{TaskError, TaskResult, unwrap, unwrap_async, wrap, wrap_async};
    pub use async_trait::async_trait;
    pub use axum::Router;
    pub use std::sync::Arc;
}
