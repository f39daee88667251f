//! The per-route adapter the dispatcher invokes on a match.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::time::Instant;

use crate::context::ContextPool;
use crate::handler::BoxedMiddleware;
use crate::hooks::HookList;
use crate::logging::{filter_url, RequestLogger};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Params, Route};

/// A route's full chain, ready to run against pooled contexts.
pub struct ContextHandle {
    route: Route,
    chain: Arc<[BoxedMiddleware]>,
}

impl ContextHandle {
    pub(crate) fn new(route: Route, chain: Vec<BoxedMiddleware>) -> Self {
        Self { route, chain: chain.into() }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Group middlewares plus the handler.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Runs the chain for one request.
    ///
    /// The completion line is logged even when the chain panics; the panic
    /// then continues unwinding and the context is dropped instead of being
    /// pooled. `ResponseReady` hooks run once the header is flushed.
    pub(crate) async fn handle(
        &self,
        pool: &ContextPool,
        filter_params: &[String],
        response_ready: &HookList,
        request: Request,
        response: Response,
        params: Params,
        logger: RequestLogger,
    ) -> (Request, Response) {
        let mut ctx = pool.get();
        ctx.reset(request, response, params, Arc::clone(&self.chain), logger);

        let started = Instant::now();
        ctx.logger().info(format_args!(
            "Started {} {}",
            ctx.request().method(),
            filter_url(ctx.request().uri(), filter_params),
        ));

        let outcome = AssertUnwindSafe(ctx.next()).catch_unwind().await;
        ctx.response_mut().flush_header();

        let status = ctx.response().status();
        ctx.logger().info(format_args!(
            "Completed {} {} in {:?}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            started.elapsed(),
        ));

        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }

        let (mut request, mut response) = ctx.release();
        pool.put(ctx);

        response_ready.run(&mut response, &mut request).await;
        (request, response)
    }
}
