//! Built-in middleware.
//!
//! Middleware is an ordinary chain entry; add it to a group with
//! [`Group::use_middleware`](crate::Group::use_middleware) or pass it to
//! [`Group::group`](crate::Group::group).
//!
//! - [`recovery`]: turns a panic in the rest of the chain into a 500.
//! - [`request_id`]: stores the request id in the context settings.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use http::StatusCode;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::response::ContentType;

/// Settings key [`request_id`] stores the id under.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Catches panics from everything after it in the chain.
///
/// The panic is logged on the request's logger. If nothing was written yet
/// the response becomes `500 Internal Server Error`; either way the chain
/// is aborted.
pub fn recovery(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let Err(payload) = AssertUnwindSafe(ctx.next()).catch_unwind().await else {
            return;
        };

        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        ctx.logger().error(format_args!("recovered from panic: {message}"));

        if !ctx.response().is_flushed() {
            let resp = ctx.response_mut();
            resp.set_content_type(ContentType::Text);
            resp.write_header(StatusCode::INTERNAL_SERVER_ERROR);
            resp.write(b"Internal Server Error");
        }
        ctx.abort();
    })
}

/// Freezes the request id into the context settings under
/// [`REQUEST_ID_KEY`], so handlers can read it with `get_final`.
pub fn request_id(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let id = ctx.request_id().to_owned();
        if let Err(e) = ctx.set_final(REQUEST_ID_KEY, id) {
            ctx.logger().warn(e);
        }
        ctx.next().await;
    })
}
