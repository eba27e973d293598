//! Lifecycle Module
//!
//! A small in-process scheduler that drives application startup and
//! shutdown through a fixed sequence of phases.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. start      bean discovery, hooks register themselves
//!    ↓
//! 2. register   wiring, order adjustments
//!    ↓
//! 3. routing    routers are mounted
//!    ↓
//! 4. init       setup hooks
//!    ↓
//! 5. run        server starts listening
//!    ↓
//! [Running...]
//!    ↓
//! 6. exit       on stop_lifecycle / SIGTERM / SIGINT
//! ```
//!
//! Within a phase, tasks are grouped by their order: groups run one after
//! another from the lowest order up, tasks inside a group run concurrently.
//! A failing task never stops the lifecycle; it shows up as an `Err` entry in
//! the phase results and as a [`LifecycleEvent::TaskFailed`] event.
//!
//! # Example
//!
//! ```rust,ignore
//! use beanloop::lifecycle::{Action, Executor, Phase};
//!
//! let executor = Executor::new();
//! executor.register_setup(database.clone(), "Database::setup");
//! executor.order("Database::setup", -1);
//! executor.set_execution(Phase::Run, Action::sync(|| {
//!     tracing::info!("Ready");
//!     Ok(())
//! }));
//!
//! executor.start_lifecycle();
//! executor.get_execution_phase(Phase::Init).await;
//! ```

mod error;
mod event;
mod executor;
mod hooks;
mod phase;
mod shutdown;
mod task;

pub use crate::config::ExecutorConfig;
pub use error::{LifecycleError, Result};
pub use event::{LifecycleEvent, PhaseResults, first_failure};
pub use executor::{Executor, LifecycleState};
pub use hooks::{Setup, Shutdown};
pub use phase::Phase;
pub use shutdown::shutdown_signal;
pub use task::{Action, Task, TaskKey};
