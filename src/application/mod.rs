//! Application Bootstrap
//!
//! Wires router beans into the lifecycle: routers are mounted during
//! `routing`, the server starts listening during `run` and is stopped
//! gracefully during `exit`. Every request waits for `init` to complete, so
//! handlers never observe beans whose setup hooks have not run yet.

use crate::config::AppConfig;
use crate::error::{BeanloopError, Result};
use crate::lifecycle::{Action, Executor, Phase, first_failure};
use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// A bean that contributes routes
///
/// # Example
///
/// ```rust,ignore
/// struct UserRouter {
///     users: Arc<UserService>,
/// }
///
/// impl RouterBean for UserRouter {
///     fn path(&self) -> &str {
///         "/users"
///     }
///
///     fn router(self: Arc<Self>) -> Router {
///         Router::new().route("/{id}", get(move |Path(id): Path<String>| async move {
///             self.users.find_one(id).await
///         }))
///     }
/// }
/// ```
pub trait RouterBean: Send + Sync + 'static {
    /// Mount path; `/` (or empty) merges the routes at the root
    fn path(&self) -> &str;

    fn router(self: Arc<Self>) -> Router;
}

struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

struct AppInner {
    executor: Executor,
    config: AppConfig,
    router: Mutex<Router>,
    local_addr: Mutex<Option<SocketAddr>>,
    server: Mutex<Option<ServerHandle>>,
}

/// A running (or starting) HTTP application
///
/// # Example
///
/// ```rust,ignore
/// use beanloop::application::Application;
///
/// #[tokio::main]
/// async fn main() -> beanloop::Result<()> {
///     let app = Application::create(
///         Application::builder()
///             .router_bean(Arc::new(UserRouter::new()))
///     )
///     .await?;
///
///     // SIGINT/SIGTERM run the exit phase and stop the server
///     std::future::pending::<()>().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Build the application, start the lifecycle and wait until the `run`
    /// phase completed.
    ///
    /// # Errors
    ///
    /// Returns [`BeanloopError::Startup`] for the first phase with a failed
    /// task. The lifecycle keeps running; call [`Application::shutdown`] to
    /// tear it down.
    pub async fn create(builder: ApplicationBuilder) -> Result<Application> {
        let app = builder.build();
        app.inner.executor.start_lifecycle();
        app.wait_started().await?;
        Ok(app)
    }

    /// Wait for every forward phase, failing on the first failed task
    pub async fn wait_started(&self) -> Result<()> {
        for phase in Phase::forward() {
            let results = self.inner.executor.get_execution_phase(phase).await;
            if let Some(error) = first_failure(&results) {
                return Err(BeanloopError::Startup {
                    phase,
                    source: error.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// The mounted routes with the init gate and request tracing applied
    pub fn router(&self) -> Router {
        self.inner.router()
    }

    /// Address the server is bound to, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Stop the lifecycle, which also stops the server
    pub async fn shutdown(&self) {
        self.inner.executor.stop_lifecycle().await;
    }
}

impl AppInner {
    fn mount(&self, bean: &Arc<dyn RouterBean>) -> anyhow::Result<()> {
        let path = bean.path().to_string();
        let root = path.is_empty() || path == "/";
        if !root && !path.starts_with('/') {
            anyhow::bail!("Router path must start with `/`: {}", path);
        }

        tracing::debug!("Registering router {}", path);
        let routes = Arc::clone(bean).router();
        let mut router = self.router.lock();
        // axum panics on conflicting or invalid paths; keep the mounted
        // routes until the new router is built
        let mounted = if root {
            router.clone().merge(routes)
        } else {
            router.clone().nest(&path, routes)
        };
        *router = mounted;
        Ok(())
    }

    fn router(&self) -> Router {
        self.router.lock().clone().layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(
                    self.executor.clone(),
                    await_init,
                )),
        )
    }

    async fn listen(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);

        let router = self.router();
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });
        *self.server.lock() = Some(ServerHandle { shutdown, task });

        tracing::info!("Server listening on port {}", addr.port());
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let server = self.server.lock().take();
        if let Some(ServerHandle { shutdown, task }) = server {
            let _ = shutdown.send(());
            task.await??;
            tracing::info!("Server stopped");
        }
        Ok(())
    }
}

async fn await_init(State(executor): State<Executor>, request: Request, next: Next) -> Response {
    executor.get_execution_phase(Phase::Init).await;
    next.run(request).await
}

fn upgrade(app: &Weak<AppInner>) -> anyhow::Result<Arc<AppInner>> {
    app.upgrade()
        .ok_or_else(|| anyhow::anyhow!("Application dropped before its lifecycle finished"))
}

/// Builder for Application
pub struct ApplicationBuilder {
    executor: Option<Executor>,
    config: AppConfig,
    beans: Vec<Arc<dyn RouterBean>>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            executor: None,
            config: AppConfig::default(),
            beans: Vec::new(),
        }
    }

    /// Use an existing executor, e.g. one that beans already registered on
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router_bean<B: RouterBean>(mut self, bean: Arc<B>) -> Self {
        self.beans.push(bean);
        self
    }

    /// Register the application's tasks without starting the lifecycle
    pub fn build(self) -> Application {
        let executor = self.executor.unwrap_or_default();
        let listen = self.config.listen;
        let inner = Arc::new(AppInner {
            executor: executor.clone(),
            config: self.config,
            router: Mutex::new(Router::new()),
            local_addr: Mutex::new(None),
            server: Mutex::new(None),
        });

        for bean in self.beans {
            let app = Arc::downgrade(&inner);
            executor.set_execution(
                Phase::Routing,
                Action::sync(move || upgrade(&app)?.mount(&bean)),
            );
        }

        if listen {
            let app = Arc::downgrade(&inner);
            executor.set_execution(
                Phase::Run,
                Action::from_async(move || {
                    let app = app.clone();
                    async move { upgrade(&app)?.listen().await }
                }),
            );
        }

        let app = Arc::downgrade(&inner);
        executor.set_execution(
            Phase::Exit,
            Action::from_async(move || {
                let app = app.clone();
                async move {
                    match app.upgrade() {
                        Some(app) => app.close().await,
                        None => Ok(()),
                    }
                }
            }),
        );

        Application { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouteError;
    use crate::lifecycle::{ExecutorConfig, Setup};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    struct TestRouter {
        hits: AtomicUsize,
    }

    impl RouterBean for TestRouter {
        fn path(&self) -> &str {
            "/test"
        }

        fn router(self: Arc<Self>) -> Router {
            Router::new()
                .route("/42", get(|| async { "42 is the answer" }))
                .route("/error", get(failing_route))
                .route(
                    "/hits",
                    get(move || async move {
                        (self.hits.fetch_add(1, Ordering::SeqCst) + 1).to_string()
                    }),
                )
        }
    }

    struct WildcardRouter;

    impl RouterBean for WildcardRouter {
        fn path(&self) -> &str {
            "/files/{*rest}"
        }

        fn router(self: Arc<Self>) -> Router {
            Router::new().route("/", get(|| async { "files" }))
        }
    }

    async fn failing_route() -> std::result::Result<&'static str, RouteError> {
        Err(RouteError::from(anyhow::anyhow!("ops!")))
    }

    fn test_router() -> Arc<TestRouter> {
        Arc::new(TestRouter {
            hits: AtomicUsize::new(0),
        })
    }

    fn detached() -> Executor {
        Executor::with_config(ExecutorConfig::detached())
    }

    fn offline() -> AppConfig {
        AppConfig {
            listen: false,
            ..AppConfig::default()
        }
    }

    async fn get_text(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(axum::http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_routes_are_mounted_during_routing() {
        let app = Application::create(
            Application::builder()
                .executor(detached())
                .config(offline())
                .router_bean(test_router()),
        )
        .await
        .unwrap();

        let (status, text) = get_text(app.router(), "/test/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "42 is the answer");

        let (_, hits) = get_text(app.router(), "/test/hits").await;
        assert_eq!(hits, "1");
        assert!(app.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_rejected_mount_keeps_earlier_routes() {
        let executor = detached();
        let app = Application::builder()
            .executor(executor.clone())
            .config(offline())
            .router_bean(test_router())
            .router_bean(Arc::new(WildcardRouter))
            .build();

        executor.start_lifecycle();
        let routing = executor.get_execution_phase(Phase::Routing).await;
        assert!(routing[0].is_ok());
        assert!(routing[1].is_err());

        let (status, text) = get_text(app.router(), "/test/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "42 is the answer");
    }

    #[tokio::test]
    async fn test_failing_route_does_not_break_others() {
        let app = Application::create(
            Application::builder()
                .executor(detached())
                .config(offline())
                .router_bean(test_router()),
        )
        .await
        .unwrap();

        let (status, _) = get_text(app.router(), "/test/error").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, text) = get_text(app.router(), "/test/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "42 is the answer");
    }

    #[tokio::test]
    async fn test_requests_wait_for_init() {
        let executor = detached();
        let (release, gate) = oneshot::channel::<()>();
        let gate = Arc::new(Mutex::new(Some(gate)));
        executor.set_execution(
            Phase::Init,
            Action::from_async(move || {
                let gate = gate.lock().take();
                async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    Ok(())
                }
            }),
        );
        let app = Application::builder()
            .executor(executor.clone())
            .config(offline())
            .router_bean(test_router())
            .build();

        executor.start_lifecycle();
        executor.get_execution_phase(Phase::Routing).await;

        let request = tokio::spawn(get_text(app.router(), "/test/42"));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!request.is_finished());

        release.send(()).unwrap();
        let (status, _) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_listens_during_run_and_stops_on_exit() {
        let app = Application::create(
            Application::builder()
                .executor(detached())
                .config(AppConfig {
                    host: "127.0.0.1".to_string(),
                    port: 0,
                    listen: true,
                })
                .router_bean(test_router()),
        )
        .await
        .unwrap();
        let addr = app.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /test/42 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("42 is the answer"));

        app.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    struct BrokenDatabase;

    #[async_trait]
    impl Setup for BrokenDatabase {
        async fn setup(&self) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_create_fails_on_setup_error() {
        let executor = detached();
        executor.register_setup(Arc::new(BrokenDatabase), "BrokenDatabase::setup");

        let result = Application::create(
            Application::builder()
                .executor(executor.clone())
                .config(offline())
                .router_bean(test_router()),
        )
        .await;

        match result {
            Err(BeanloopError::Startup { phase, source }) => {
                assert_eq!(phase, Phase::Init);
                assert_eq!(source.to_string(), "connection refused");
            }
            _ => panic!("expected a startup failure"),
        }
        executor.stop_lifecycle().await;
    }

    #[tokio::test]
    async fn test_invalid_mount_path_fails_routing() {
        struct Unrooted;

        impl RouterBean for Unrooted {
            fn path(&self) -> &str {
                "users"
            }

            fn router(self: Arc<Self>) -> Router {
                Router::new()
            }
        }

        let result = Application::create(
            Application::builder()
                .executor(detached())
                .config(offline())
                .router_bean(Arc::new(Unrooted)),
        )
        .await;

        assert!(matches!(
            result,
            Err(BeanloopError::Startup {
                phase: Phase::Routing,
                ..
            })
        ));
    }
}
