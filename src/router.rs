//! Route groups over a radix-tree dispatcher.
//!
//! One [`matchit`] tree per HTTP method, shared by every [`Group`] of an
//! application. A group owns a path prefix and a middleware chain; a child
//! group copies its parent's chain and appends to the copy, so parents are
//! never affected by what their children register.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;
use parking_lot::RwLock;

use crate::context::ABORT_INDEX;
use crate::handle::ContextHandle;
use crate::handler::{boxed, BoxedMiddleware, Middleware};

/// Reserved liveness route. Registering anything here panics.
pub const HEALTH_CHECK_PATH: &str = "/-/healthz";

/// Verbs wired by [`Group::any`] and by dispatch-style controllers.
pub(crate) const STANDARD_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// Path parameters captured by the matched route, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A registered method and full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

/// Every route of one application.
#[derive(Default)]
pub(crate) struct RouteTable {
    trees: HashMap<Method, MatchitRouter<Arc<ContextHandle>>>,
    routes: Vec<Route>,
}

impl RouteTable {
    /// Adds a route. Conflicting or malformed patterns panic: routes are
    /// registered at boot and a broken table must never start serving.
    pub(crate) fn insert(&mut self, method: Method, path: &str, chain: Vec<BoxedMiddleware>) {
        let route = Route { method: method.clone(), path: path.to_owned() };
        let handle = Arc::new(ContextHandle::new(route.clone(), chain));
        self.trees
            .entry(method.clone())
            .or_default()
            .insert(path, handle)
            .unwrap_or_else(|e| panic!("invalid route {method} `{path}`: {e}"));
        self.routes.push(route);
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<ContextHandle>, Params)> {
        let tree = self.trees.get(method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter().collect();
        Some((Arc::clone(matched.value), params))
    }

    pub(crate) fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// Shared handle on an application's route table.
pub(crate) type SharedTable = Arc<RwLock<RouteTable>>;

/// A path prefix plus the middleware every route under it runs.
///
/// ```rust,no_run
/// use hookd::{AppConfig, AppServer, BoxFuture, Context};
///
/// fn auth(ctx: &mut Context) -> BoxFuture<'_, ()> {
///     Box::pin(async move { ctx.next().await })
/// }
///
/// fn list(ctx: &mut Context) -> BoxFuture<'_, ()> {
///     Box::pin(async move { ctx.text("[]") })
/// }
///
/// let app = AppServer::new(&AppConfig::default());
/// let api = app.group("/api/v1", [hookd::boxed(auth)]);
/// api.get("/users", list); // auth, then list
/// ```
#[derive(Clone)]
pub struct Group {
    prefix: String,
    middlewares: Vec<BoxedMiddleware>,
    table: SharedTable,
}

impl Group {
    pub(crate) fn root(table: SharedTable) -> Self {
        Self { prefix: "/".to_owned(), middlewares: Vec::new(), table }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of middlewares routes of this group run before their handler.
    pub fn middleware_len(&self) -> usize {
        self.middlewares.len()
    }

    /// Creates a child group under `prefix` whose chain is this group's
    /// chain followed by `middlewares`.
    pub fn group(&self, prefix: &str, middlewares: impl IntoIterator<Item = BoxedMiddleware>) -> Group {
        let mut chain = self.middlewares.clone();
        chain.extend(middlewares);
        Group {
            prefix: join_paths(&self.prefix, prefix),
            middlewares: chain,
            table: Arc::clone(&self.table),
        }
    }

    /// Appends a middleware for routes registered on this group from now on.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middlewares.push(boxed(middleware));
        self
    }

    /// Registers `handler` as the last entry of this group's chain for
    /// `method` on `path`.
    ///
    /// # Panics
    ///
    /// On the reserved [`HEALTH_CHECK_PATH`], on a conflicting pattern, and
    /// when the chain is too long for the context cursor.
    pub fn handle(&self, method: Method, path: &str, handler: impl Middleware) -> &Self {
        self.handle_boxed(method, path, boxed(handler))
    }

    pub(crate) fn handle_boxed(&self, method: Method, path: &str, handler: BoxedMiddleware) -> &Self {
        let full = join_paths(&self.prefix, path);
        if full == HEALTH_CHECK_PATH {
            panic!("`{HEALTH_CHECK_PATH}` is reserved for the health check");
        }

        let mut chain = self.middlewares.clone();
        chain.push(handler);
        if chain.len() >= ABORT_INDEX as usize {
            panic!("route {method} `{full}` has {} entries, limit is {}", chain.len(), ABORT_INDEX - 1);
        }

        tracing::debug!(%method, path = %full, chain = chain.len(), "route registered");
        self.table.write().insert(method, &full, chain);
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

    pub fn head(&self, path: &str, handler: impl Middleware) -> &Self {
        self.handle(Method::HEAD, path, handler)
    }

    pub fn options(&self, path: &str, handler: impl Middleware) -> &Self {
        self.handle(Method::OPTIONS, path, handler)
    }

    /// Registers `handler` for every standard method.
    pub fn any(&self, path: &str, handler: impl Middleware) -> &Self {
        let handler = boxed(handler);
        for method in STANDARD_METHODS {
            self.handle_boxed(method, path, Arc::clone(&handler));
        }
        self
    }
}

/// Joins `base` and `rel` the way a URL path is resolved: duplicate
/// slashes, `.` and `..` segments are cleaned. A trailing slash on `rel`
/// survives.
pub(crate) fn join_paths(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        return base.to_owned();
    }
    let joined = clean(&format!("{base}/{rel}"));
    if rel.ends_with('/') && !joined.ends_with('/') {
        joined + "/"
    } else {
        joined
    }
}

fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;
    use crate::context::Context;
    use crate::handler::BoxFuture;

    fn noop(ctx: &mut Context) -> BoxFuture<'_, ()> {
        Box::pin(async move { ctx.finish() })
    }

    fn root() -> Group {
        Group::root(Arc::new(RwLock::new(RouteTable::default())))
    }

    #[test]
    fn join_paths_cleans_and_keeps_trailing_slash() {
        assert_eq!(join_paths("/", "api"), "/api");
        assert_eq!(join_paths("/api", "/v1/"), "/api/v1/");
        assert_eq!(join_paths("/api/", "//users"), "/api/users");
        assert_eq!(join_paths("/api/v1", "../v2"), "/api/v2");
        assert_eq!(join_paths("/api", ""), "/api");
        assert_eq!(join_paths("/", "/"), "/");
    }

    #[test]
    fn child_group_extends_parent_chain_without_mutating_it() {
        let root = root();
        let parent = root.group("/api", [boxed(noop)]);
        let child = parent.group("v1", [boxed(noop), boxed(noop)]);

        assert_eq!(parent.prefix(), "/api");
        assert_eq!(parent.middleware_len(), 1);
        assert_eq!(child.prefix(), "/api/v1");
        assert_eq!(child.middleware_len(), 3);
    }

    #[test]
    fn lookup_returns_params_and_chain() {
        let root = root();
        root.group("/users", [boxed(noop)]).get("/{id}", noop);

        let table = root.table.read();
        let (handle, params) = table.lookup(&Method::GET, "/users/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(handle.chain_len(), 2);
        assert_eq!(handle.route().path, "/users/{id}");

        assert!(table.lookup(&Method::POST, "/users/42").is_none());
        assert!(table.lookup(&Method::GET, "/users").is_none());
    }

    #[test]
    fn any_registers_every_standard_method() {
        let root = root();
        root.any("/echo", noop);
        assert_eq!(root.table.read().routes().len(), STANDARD_METHODS.len());
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn health_path_is_reserved() {
        root().group("/-", []).get("healthz", noop);
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_route_panics() {
        let root = root();
        root.get("/users/{id}", noop);
        root.get("/users/{name}", noop);
    }

    #[test]
    #[should_panic(expected = "limit")]
    fn overlong_chain_panics() {
        let chain: Vec<BoxedMiddleware> = (0..ABORT_INDEX).map(|_| boxed(noop)).collect();
        root().group("/", chain).get("/deep", noop);
    }
}
