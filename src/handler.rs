//! Middleware trait and type erasure.
//!
//! # How the chain is stored
//!
//! A route's chain mixes functions and structs of different types, so every
//! entry is erased to `Arc<dyn Middleware>` and the whole chain is shared as
//! `Arc<[BoxedMiddleware]>` by every request that hits the route:
//!
//! ```text
//! fn auth(ctx: &mut Context) -> BoxFuture<'_, ()> { … }   ← user writes this
//!        ↓ group.get("/", auth)
//! Arc::new(auth)                                           ← blanket impl below
//!        ↓  stored as BoxedMiddleware = Arc<dyn Middleware>
//! handler.call(ctx)  at request time                       ← one vtable dispatch
//! ```
//!
//! # Writing middleware
//!
//! Middleware borrows the [`Context`] for the duration of its future, so it
//! is written as a function returning a boxed future:
//!
//! ```rust
//! use hookd::{BoxFuture, Context};
//!
//! fn timing(ctx: &mut Context) -> BoxFuture<'_, ()> {
//!     Box::pin(async move {
//!         let started = std::time::Instant::now();
//!         ctx.next().await;
//!         ctx.logger().debug(format_args!("chain took {:?}", started.elapsed()));
//!     })
//! }
//! ```
//!
//! Not calling `ctx.next()` ends the chain at that entry; outer entries
//! still resume. [`Context::abort`] additionally stops outer entries from
//! reaching their later siblings.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// A heap-allocated, type-erased future borrowing the request's state.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One entry of a route's chain: middleware or the final handler.
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()>;
}

/// Shared, type-erased chain entry.
pub type BoxedMiddleware = Arc<dyn Middleware>;

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        (self)(ctx)
    }
}

/// Erases a middleware for use in a group's middleware list.
pub fn boxed<M: Middleware>(middleware: M) -> BoxedMiddleware {
    Arc::new(middleware)
}
