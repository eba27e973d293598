//! Graceful Shutdown
//!
//! Handles OS signals and funnels them into the executor's `exit` phase.

use super::Executor;
use tokio::signal;

impl Executor {
    /// Run the `exit` phase after a shutdown signal, then terminate the
    /// process with a success status if the executor is configured to.
    ///
    /// Returns the exit status that was (or would have been) used.
    pub async fn graceful_shutdown(&self) -> i32 {
        tracing::debug!("Graceful shutdown");
        // The hook that called us must not be aborted by the stop below.
        drop(self.inner.signal_hook.lock().take());

        self.stop_lifecycle().await;
        tracing::info!("Graceful shutdown completed");

        if self.inner.config.exit_on_signal {
            std::process::exit(0);
        }
        0
    }

    pub(super) fn install_signal_hook(&self) {
        if !self.inner.config.handle_signals {
            return;
        }
        let executor = self.clone();
        let hook = tokio::spawn(async move {
            shutdown_signal().await;
            executor.graceful_shutdown().await;
        });
        if let Some(previous) = self.inner.signal_hook.lock().replace(hook) {
            previous.abort();
        }
    }

    pub(super) fn remove_signal_hook(&self) {
        if let Some(hook) = self.inner.signal_hook.lock().take() {
            hook.abort();
        }
    }
}

/// Create a future that completes when a shutdown signal is received
///
/// # Example
///
/// ```rust,ignore
/// use beanloop::lifecycle::shutdown_signal;
///
/// tokio::select! {
///     _ = shutdown_signal() => {
///         println!("Shutdown signal received");
///     }
///     _ = server.serve() => {}
/// }
/// ```
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
