//! Per-request state and the middleware cursor.
//!
//! A [`Context`] is owned by exactly one in-flight request. It is drawn from
//! the server's [`ContextPool`] when a route matches, reset, driven through
//! the route's chain with [`Context::next`], and returned to the pool once
//! the response is ready.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, LOCATION};
use http::StatusCode;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedMiddleware};
use crate::logging::RequestLogger;
use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::router::Params;

/// Cursor value that parks the chain: past any real chain length.
pub(crate) const ABORT_INDEX: i8 = i8::MAX / 2;

/// Upper bound on pooled contexts kept around between requests.
const MAX_POOLED: usize = 1024;

type Settings = HashMap<String, Box<dyn Any + Send + Sync>>;

pub struct Context {
    index: i8,
    handlers: Arc<[BoxedMiddleware]>,
    settings: Option<Settings>,
    frozen_settings: Option<Settings>,
    pub(crate) request: Request,
    pub(crate) response: Response,
    params: Params,
    logger: RequestLogger,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            index: -1,
            handlers: Arc::new([]),
            settings: None,
            frozen_settings: None,
            request: Request::default(),
            response: Response::new(),
            params: Params::default(),
            logger: RequestLogger::new(""),
        }
    }

    /// Rebinds a pooled context to a new request.
    pub(crate) fn reset(
        &mut self,
        request: Request,
        response: Response,
        params: Params,
        handlers: Arc<[BoxedMiddleware]>,
        logger: RequestLogger,
    ) {
        self.index = -1;
        self.handlers = handlers;
        self.settings = None;
        self.frozen_settings = None;
        self.request = request;
        self.response = response;
        self.params = params;
        self.logger = logger;
    }

    /// Hands the request and response back, leaving placeholders behind.
    pub(crate) fn release(&mut self) -> (Request, Response) {
        self.handlers = Arc::new([]);
        self.settings = None;
        self.frozen_settings = None;
        (
            std::mem::take(&mut self.request),
            std::mem::take(&mut self.response),
        )
    }

    // ── Chain control ─────────────────────────────────────────────────────────

    /// Runs the rest of the chain.
    ///
    /// Each entry that calls `next` itself recurses into the remainder, so
    /// code after its `next().await` runs once everything downstream has
    /// finished.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.index = self.index.saturating_add(1);
            while (self.index as usize) < self.handlers.len() {
                let handler = Arc::clone(&self.handlers[self.index as usize]);
                handler.call(self).await;
                self.index = self.index.saturating_add(1);
            }
        })
    }

    /// Stops the chain: no entry after the current one runs, including
    /// later siblings of entries already in progress.
    pub fn abort(&mut self) {
        self.index = ABORT_INDEX;
    }

    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    /// Position of the running entry; `-1` before the chain starts.
    pub fn index(&self) -> i8 {
        self.index
    }

    /// Writes `status` with an empty body and aborts.
    pub fn abort_with_status(&mut self, status: StatusCode) {
        self.response.write_header(status);
        self.response.flush_header();
        self.abort();
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    /// Stores a value for later entries of the chain.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.settings
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), Box::new(value));
    }

    /// Looks up a value stored with [`set`](Self::set). `None` also when the
    /// stored value has a different type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.settings.as_ref()?.get(key)?.downcast_ref::<T>()
    }

    /// Stores a value that can never be replaced for the rest of the request.
    pub fn set_final<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> Result<(), Error> {
        let key = key.into();
        let frozen = self.frozen_settings.get_or_insert_with(HashMap::new);
        if frozen.contains_key(&key) {
            return Err(Error::SettingsKey(key));
        }
        frozen.insert(key, Box::new(value));
        Ok(())
    }

    pub fn get_final<T: Any>(&self, key: &str) -> Option<&T> {
        self.frozen_settings.as_ref()?.get(key)?.downcast_ref::<T>()
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Named path parameter: `{id}` in `/users/{id}`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn logger(&self) -> &RequestLogger {
        &self.logger
    }

    pub fn request_id(&self) -> &str {
        self.logger.request_id()
    }

    // ── Rendering ─────────────────────────────────────────────────────────────

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.write_header(status);
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response.set_header(name, value);
    }

    /// Writes a plain-text body.
    pub fn text(&mut self, body: impl AsRef<str>) {
        self.response.set_content_type(ContentType::Text);
        self.response.write(body.as_ref().as_bytes());
    }

    /// Serialises `value` and writes it as `application/json`.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value)?;
        self.response.set_content_type(ContentType::Json);
        self.response.write(&bytes);
        Ok(())
    }

    /// Completes the response without a body, committing the current status.
    pub fn finish(&mut self) {
        self.response.flush_header();
    }

    /// `302 Found` to `location`.
    pub fn redirect(&mut self, location: &str) -> Result<(), Error> {
        self.response.set_header(LOCATION, HeaderValue::from_str(location)?);
        self.response.write_header(StatusCode::FOUND);
        self.response.flush_header();
        Ok(())
    }
}

/// Free list of contexts shared by every connection task.
///
/// No ordering guarantee: whichever context was freed last is reused first,
/// and an empty pool allocates.
#[derive(Default)]
pub struct ContextPool {
    free: Mutex<Vec<Box<Context>>>,
}

impl ContextPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Box<Context> {
        self.free.lock().pop().unwrap_or_else(|| Box::new(Context::new()))
    }

    pub(crate) fn put(&self, mut ctx: Box<Context>) {
        ctx.release();
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED {
            free.push(ctx);
        }
    }

    /// Contexts currently parked in the pool.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::handler::{boxed, Middleware};

    /// Records its name before and after the rest of the chain.
    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        abort: bool,
    }

    impl Middleware for Trace {
        fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:{}", self.name, ctx.index()));
                if self.abort {
                    ctx.abort();
                    return;
                }
                ctx.next().await;
                self.log.lock().push(format!("{}:after", self.name));
            })
        }
    }

    /// Never calls `next`.
    struct Stop {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Stop {
        fn call<'a>(&'a self, _ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async move { self.log.lock().push("stop".to_owned()) })
        }
    }

    fn trace(name: &'static str, log: &Arc<Mutex<Vec<String>>>, abort: bool) -> BoxedMiddleware {
        boxed(Trace { name, log: Arc::clone(log), abort })
    }

    fn context_with(chain: Vec<BoxedMiddleware>) -> Context {
        let mut ctx = Context::new();
        ctx.reset(
            Request::default(),
            Response::new(),
            Params::default(),
            chain.into(),
            RequestLogger::new("test"),
        );
        ctx
    }

    #[tokio::test]
    async fn next_runs_chain_as_onion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context_with(vec![trace("a", &log, false), trace("b", &log, false)]);

        ctx.next().await;

        assert_eq!(*log.lock(), vec!["a:0", "b:1", "b:after", "a:after"]);
        assert_eq!(ctx.index(), 2);
    }

    #[tokio::test]
    async fn entries_without_next_still_let_siblings_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stop = boxed(Stop { log: Arc::clone(&log) });
        let mut ctx = context_with(vec![stop, trace("b", &log, false)]);

        ctx.next().await;

        // the outer loop carries on to the next entry
        assert_eq!(*log.lock(), vec!["stop", "b:1", "b:after"]);
    }

    #[tokio::test]
    async fn abort_skips_remaining_entries() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context_with(vec![
            trace("a", &log, false),
            trace("b", &log, true),
            trace("c", &log, false),
        ]);

        ctx.next().await;

        assert_eq!(*log.lock(), vec!["a:0", "b:1", "a:after"]);
        assert!(ctx.is_aborted());
    }

    #[tokio::test]
    async fn index_never_decreases() {
        struct Probe(Arc<Mutex<Vec<i8>>>);
        impl Middleware for Probe {
            fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
                Box::pin(async move {
                    self.0.lock().push(ctx.index());
                    ctx.next().await;
                    self.0.lock().push(ctx.index());
                })
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = (0..4).map(|_| boxed(Probe(Arc::clone(&seen)))).collect();
        let mut ctx = context_with(chain);
        ctx.next().await;

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    }

    #[test]
    fn settings_are_typed_and_lazy() {
        let mut ctx = Context::new();
        assert!(ctx.get::<u32>("user").is_none());

        ctx.set("user", 42u32);
        ctx.set("user", 43u32);
        assert_eq!(ctx.get::<u32>("user"), Some(&43));
        assert!(ctx.get::<String>("user").is_none());
    }

    #[test]
    fn final_settings_refuse_overwrite() {
        let mut ctx = Context::new();
        ctx.set_final("tenant", "acme".to_owned()).unwrap();

        let err = ctx.set_final("tenant", "evil".to_owned()).unwrap_err();
        assert!(matches!(err, Error::SettingsKey(ref k) if k == "tenant"));
        assert_eq!(ctx.get_final::<String>("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn pool_reuses_and_resets() {
        let pool = ContextPool::new();
        let mut ctx = pool.get();
        ctx.set("k", 1u8);
        ctx.set_final("f", 2u8).unwrap();
        pool.put(ctx);
        assert_eq!(pool.idle(), 1);

        let mut ctx = pool.get();
        assert_eq!(pool.idle(), 0);
        ctx.reset(
            Request::default(),
            Response::new(),
            Params::default(),
            Arc::new([]),
            RequestLogger::new("again"),
        );
        assert!(ctx.get::<u8>("k").is_none());
        assert!(ctx.get_final::<u8>("f").is_none());
        assert_eq!(ctx.index(), -1);
        assert_eq!(ctx.request_id(), "again");
    }

    #[test]
    fn abort_with_status_commits_header() {
        let mut ctx = Context::new();
        ctx.abort_with_status(StatusCode::UNAUTHORIZED);
        assert!(ctx.is_aborted());
        assert!(ctx.response().is_flushed());
        assert_eq!(ctx.response().status(), StatusCode::UNAUTHORIZED);
    }
}
