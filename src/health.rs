//! Built-in liveness probe.
//!
//! Every [`AppServer`](crate::AppServer) answers `GET /-/healthz` with
//! `200 ok`. The path is reserved: registering a route on it panics at
//! boot. The probe runs through the hook pipeline like any other route, so
//! admission control applies to it too.

use crate::context::Context;
use crate::handler::BoxFuture;

/// Always `200 OK` with body `"ok"`. If the process can answer HTTP at all
/// it is alive.
pub fn liveness(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move { ctx.text("ok") })
}
