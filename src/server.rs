//! The application server and its transport.
//!
//! # Request flow
//!
//! ```text
//! connection ─▶ Listener ─▶ serve_http
//!                             ├─ request_received hooks   (may reject)
//!                             ├─ route lookup             (404 on miss)
//!                             ├─ request_routed hooks     (may reject)
//!                             ├─ ContextHandle: chain, flush, response_ready hooks
//!                             └─ response_always hooks
//! ```
//!
//! # Graceful shutdown
//!
//! On [`AppServer::shutdown`] (or SIGTERM / Ctrl-C under [`AppServer::run`])
//! the server:
//! 1. Drops the listener: new connection attempts are refused.
//! 2. Asks every open connection to finish its current request and close.
//! 3. Waits for those connections, then returns from [`AppServer::serve`].
//!
//! No deadline is imposed on in-flight requests beyond the configured
//! write timeout.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{HeaderName, HeaderValue, CONNECTION};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Configer, LoggerConfig, ServerConfig};
use crate::context::ContextPool;
use crate::error::Error;
use crate::handler::{boxed, BoxedMiddleware, Middleware};
use crate::health;
use crate::hooks::{server_demotion_hook, server_throttle_hook, ServerHooks};
use crate::listener::{unix_rewrite_hook, Accepted, Listener};
use crate::logging::RequestLogger;
use crate::request::Request;
use crate::resource::Controller;
use crate::response::{ContentType, Response};
use crate::router::{Group, Route, RouteTable, SharedTable, HEALTH_CHECK_PATH};
use crate::shutdown::{self, Shutdown};

/// hyper refuses read buffers smaller than this.
const MIN_BUF_SIZE: usize = 8192;

/// Composition root: routes, hooks, the context pool and the transport.
///
/// Configure it mutably, then share it as `Arc<AppServer>` to serve:
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use hookd::{AppConfig, AppServer, BoxFuture, Context, StatusCode};
///
/// fn ping(ctx: &mut Context) -> BoxFuture<'_, ()> {
///     Box::pin(async move {
///         ctx.set_status(StatusCode::NO_CONTENT);
///         ctx.finish();
///     })
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let app = AppServer::new(&AppConfig::default());
///     app.get("/ping", ping);
///     Arc::new(app).dispatch().await;
/// }
/// ```
pub struct AppServer {
    name: String,
    config: ServerConfig,
    logger: LoggerConfig,
    request_id_header: HeaderName,
    table: SharedTable,
    root: Group,
    pool: ContextPool,
    hooks: ServerHooks,
    shutdown: Shutdown,
}

impl AppServer {
    /// Builds a server from the active config section.
    ///
    /// Installs the liveness route, the Unix path rewrite for `unix`
    /// networks, and the throttle and demotion hooks when enabled.
    pub fn new(config: &(impl Configer + ?Sized)) -> Self {
        let section = config.section();
        let server = section.server.clone();

        let request_id_header = HeaderName::from_bytes(server.request_id.as_bytes()).unwrap_or_else(|e| {
            warn!(header = %server.request_id, "invalid request id header, using default: {e}");
            HeaderName::from_static("x-request-id")
        });

        let table: SharedTable = Arc::new(RwLock::new(RouteTable::default()));
        table.write().insert(Method::GET, HEALTH_CHECK_PATH, vec![boxed(health::liveness)]);

        let shutdown = Shutdown::new();
        let mut hooks = ServerHooks::default();
        if server.is_unix() {
            hooks.request_received.push_front_named(unix_rewrite_hook(&server.addr));
        }
        if server.throttle > 0 {
            hooks.request_received.push_back_named(server_throttle_hook(server.throttle));
        }
        if server.demotion > 0 {
            hooks.request_received.push_back_named(server_demotion_hook(
                server.demotion,
                server.demotion_window(),
                shutdown.subscribe(),
                server.demotion_bypass(),
            ));
        }

        Self {
            name: config.name().to_owned(),
            config: server,
            logger: section.logger.clone(),
            request_id_header,
            root: Group::root(Arc::clone(&table)),
            table,
            pool: ContextPool::new(),
            hooks,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hooks(&self) -> &ServerHooks {
        &self.hooks
    }

    /// Hook lists can only change before the server is shared for serving.
    pub fn hooks_mut(&mut self) -> &mut ServerHooks {
        &mut self.hooks
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// Every registered route, in registration order.
    pub fn routes(&self) -> Vec<Route> {
        self.table.read().routes().to_vec()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// The root group, prefix `/`.
    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn group(&self, prefix: &str, middlewares: impl IntoIterator<Item = BoxedMiddleware>) -> Group {
        self.root.group(prefix, middlewares)
    }

    /// Adds a middleware to the root group. Applies to routes registered
    /// afterwards, including routes of groups created afterwards.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.root.use_middleware(middleware);
        self
    }

    pub fn handle(&self, method: Method, path: &str, handler: impl Middleware) -> &Self {
        self.root.handle(method, path, handler);
        self
    }

    pub fn get(&self, path: &str, handler: impl Middleware) -> &Self {
        self.handle(Method::GET, path, handler)
    }

    pub fn post(&self, path: &str, handler: impl Middleware) -> &Self {
        self.handle(Method::POST, path, handler)
    }

    pub fn put(&self, path: &str, handler: impl Middleware) -> &Self {
        self.handle(Method::PUT, path, handler)
    }

    pub fn patch(&self, path: &str, handler: impl Middleware) -> &Self {
        self.handle(Method::PATCH, path, handler)
    }

    pub fn delete(&self, path: &str, handler: impl Middleware) -> &Self {
        self.handle(Method::DELETE, path, handler)
    }

    pub fn any(&self, path: &str, handler: impl Middleware) -> &Self {
        self.root.any(path, handler);
        self
    }

    pub fn resource(&self, name: &str, controller: &impl Controller) -> Group {
        self.root.resource(name, controller)
    }

    // ── Request handling ──────────────────────────────────────────────────────

    /// Runs one request through the hook phases and its route.
    ///
    /// `response_always` hooks run for every response produced here,
    /// rejections and 404s included. A panic escaping the chain skips them
    /// and unwinds out of this call.
    pub async fn serve_http(&self, request: Request) -> Response {
        let request_id = request
            .headers()
            .get(&self.request_id_header)
            .and_then(|v| v.to_str().ok())
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut response = Response::new();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.set_header(self.request_id_header.clone(), value);
        }
        let logger = RequestLogger::new(request_id);

        let (mut request, mut response) = self.route(request, response, logger).await;
        self.hooks.response_always.run(&mut response, &mut request).await;
        response
    }

    async fn route(&self, mut request: Request, mut response: Response, logger: RequestLogger) -> (Request, Response) {
        if !self.hooks.request_received.run(&mut response, &mut request).await {
            logger.debug(format_args!("rejected before routing with {}", response.status()));
            return (request, response);
        }

        let found = self.table.read().lookup(request.method(), request.path());
        let Some((handle, params)) = found else {
            logger.debug(format_args!("no route for {} {}", request.method(), request.path()));
            response.set_content_type(ContentType::Text);
            response.write_header(StatusCode::NOT_FOUND);
            response.write(b"404 page not found");
            return (request, response);
        };

        if !self.hooks.request_routed.run(&mut response, &mut request).await {
            logger.debug(format_args!("rejected after routing with {}", response.status()));
            return (request, response);
        }

        handle
            .handle(
                &self.pool,
                &self.logger.filter_params,
                &self.hooks.response_ready,
                request,
                response,
                params,
                logger,
            )
            .await
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Binds the configured TCP address or Unix socket.
    pub async fn bind(&self) -> Result<Listener, Error> {
        Listener::bind(&self.config).await
    }

    /// Serves connections from `listener` until [`shutdown`](Self::shutdown)
    /// is called, then drains in-flight connections.
    pub async fn serve(self: Arc<Self>, listener: Listener) -> Result<(), Error> {
        info!(name = %self.name, addr = %listener.local_addr(), "listening");

        let mut stop = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                () = shutdown::wait(&mut stop) => {
                    info!(in_flight = tasks.len(), "shutting down, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let accepted = match res {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let server = Arc::clone(&self);
                    tasks.spawn(server.serve_connection(accepted));
                }

                // reap finished connections
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        while tasks.join_next().await.is_some() {}

        info!(name = %self.name, "stopped");
        Ok(())
    }

    /// Binds, then serves until SIGTERM / Ctrl-C or [`shutdown`](Self::shutdown).
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let listener = self.bind().await?;

        let server = Arc::clone(&self);
        let signals = tokio::spawn(async move {
            shutdown::os_signal().await;
            info!("shutdown signal received");
            server.shutdown();
        });

        let result = self.serve(listener).await;
        signals.abort();
        result
    }

    /// [`run`](Self::run), exiting the process if the listener cannot be
    /// bound.
    pub async fn dispatch(self: Arc<Self>) {
        if let Err(e) = self.run().await {
            error!("server failed: {e}");
            std::process::exit(1);
        }
    }

    /// Stops accepting connections and lets in-flight requests finish.
    pub fn shutdown(&self) {
        if !self.shutdown.is_triggered() {
            info!(name = %self.name, "shutdown requested");
        }
        self.shutdown.trigger();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    async fn serve_connection(self: Arc<Self>, accepted: Accepted) {
        match accepted {
            Accepted::Tcp(stream, peer) => self.drive(TokioIo::new(stream), Some(peer)).await,
            #[cfg(unix)]
            Accepted::Unix(stream) => self.drive(TokioIo::new(stream), None).await,
        }
    }

    async fn drive<I>(self: Arc<Self>, io: TokioIo<I>, peer: Option<SocketAddr>)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let server = Arc::clone(&self);
        // called once per request on the connection
        let svc = service_fn(move |req| Arc::clone(&server).respond(req, peer));

        let mut builder = ConnBuilder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.read_timeout())
            .max_buf_size(self.config.max_header_bytes.max(MIN_BUF_SIZE));

        let conn = builder.serve_connection(io, svc);
        tokio::pin!(conn);

        let mut stop = self.shutdown.subscribe();
        let mut draining = *stop.borrow_and_update();
        if draining {
            conn.as_mut().graceful_shutdown();
        }

        loop {
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        debug!(peer = ?peer, "connection closed with error: {e}");
                    }
                    break;
                }
                // a dropped sender means the server is gone, which drains too
                _ = stop.changed(), if !draining => {
                    conn.as_mut().graceful_shutdown();
                    draining = true;
                }
            }
        }
    }

    /// Reads the body, serves the request, and applies the write deadline.
    /// An error return makes hyper close the connection.
    async fn respond(
        self: Arc<Self>,
        req: hyper::Request<Incoming>,
        peer: Option<SocketAddr>,
    ) -> Result<http::Response<Full<Bytes>>, Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        let request = Request::from_parts(parts, body, peer);

        let work = AssertUnwindSafe(self.serve_http(request)).catch_unwind();
        let outcome = match self.config.write_timeout() {
            Some(deadline) => tokio::time::timeout(deadline, work).await.map_err(|_| {
                warn!(peer = ?peer, ?deadline, "response not ready in time, closing connection");
                Error::WriteTimeout
            })?,
            None => work.await,
        };

        match outcome {
            Ok(response) => Ok(response.into_http()),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("non-string panic payload");
                error!(peer = ?peer, "unrecovered panic in handler chain: {message}");
                Ok(panic_response())
            }
        }
    }
}

/// Bare 500 for panics no recovery middleware caught.
fn panic_response() -> http::Response<Full<Bytes>> {
    let mut resp = http::Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    resp
}
