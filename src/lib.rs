//! # hookd
//!
//! An HTTP request runtime: phased hooks around every request, onion-style
//! middleware chains per route, and admission control built in.
//!
//! ## The request pipeline
//!
//! Each request runs through four hook phases (see [`hooks`]) around a
//! route's middleware chain:
//!
//! - **request_received**: before routing. Throttle and demotion live here.
//! - **request_routed**: after a route matched.
//! - **response_ready**: after the chain, before the body is sent.
//! - **response_always**: after every response.
//!
//! Any hook in the first two phases can end the request by returning
//! `false` after writing its own response.
//!
//! ## Admission control
//!
//! - **Throttle**: a token bucket at `throttle` requests per second. Excess
//!   requests get `418 I'm a teapot` with a `Retry-After` timestamp.
//! - **Demotion**: `demotion` tokens refilled on a timer. A request waits
//!   up to `demotion_window` seconds for a token, then gets
//!   `429 Too Many Requests`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hookd::{middleware, AppConfig, AppServer, BoxFuture, Configer, Context, StatusCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     hookd::logging::init(&config.section().logger);
//!
//!     let mut app = AppServer::new(&config);
//!     app.use_middleware(middleware::recovery);
//!     app.get("/ping", ping);
//!     app.group("/users", []).get("/{id}", show_user);
//!
//!     Arc::new(app).dispatch().await;
//! }
//!
//! fn ping(ctx: &mut Context) -> BoxFuture<'_, ()> {
//!     Box::pin(async move {
//!         ctx.set_status(StatusCode::NO_CONTENT);
//!         ctx.finish();
//!     })
//! }
//!
//! fn show_user(ctx: &mut Context) -> BoxFuture<'_, ()> {
//!     Box::pin(async move {
//!         let id = ctx.param("id").unwrap_or("unknown").to_owned();
//!         if let Err(e) = ctx.json(&serde_json::json!({ "id": id })) {
//!             ctx.logger().error(e);
//!         }
//!     })
//! }
//! ```

mod context;
mod error;
mod handle;
mod handler;
mod request;
mod resource;
mod response;
mod router;
mod server;

pub mod config;
pub mod health;
pub mod hooks;
pub mod listener;
pub mod logging;
pub mod middleware;
pub mod shutdown;

pub use config::{AppConfig, Configer, LoggerConfig, SectionConfig, ServerConfig};
pub use context::{Context, ContextPool};
pub use error::Error;
pub use handle::ContextHandle;
pub use handler::{boxed, BoxFuture, BoxedMiddleware, Middleware};
pub use hooks::{Hook, HookList, NamedHook, ServerHooks};
pub use http::{Method, StatusCode};
pub use listener::Listener;
pub use logging::RequestLogger;
pub use request::Request;
pub use resource::{Action, Controller};
pub use response::{ContentType, Response, ResponseFilter};
pub use router::{Group, Params, Route, HEALTH_CHECK_PATH};
pub use server::AppServer;
pub use shutdown::Shutdown;
