//! Phased request hooks.
//!
//! Every request passes through four [`HookList`]s:
//!
//! | Phase | Runs | On `false` |
//! |---|---|---|
//! | `request_received` | before routing | request ends with the hook's response |
//! | `request_routed` | after a route matched | request ends with the hook's response |
//! | `response_ready` | after the chain, before the body is sent | remaining ready hooks are skipped |
//! | `response_always` | after every response, rejections and 404s included | remaining hooks are skipped |
//!
//! A hook that returns `false` is responsible for writing the rejection
//! into the [`Response`] it was given.
//!
//! Lists are configured on the server before it starts serving and are
//! read-only afterwards.

pub mod demotion;
pub mod throttle;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderValue, RETRY_AFTER};
use http::StatusCode;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::{ContentType, Response};

pub use demotion::{server_demotion_hook, Demotion};
pub use throttle::{server_throttle_hook, Throttle};

/// A short-circuiting predicate over the request and its response.
pub trait Hook: Send + Sync + 'static {
    fn apply<'a>(&'a self, resp: &'a mut Response, req: &'a mut Request) -> BoxFuture<'a, bool>;
}

impl<F> Hook for F
where
    F: for<'a> Fn(&'a mut Response, &'a mut Request) -> BoxFuture<'a, bool> + Send + Sync + 'static,
{
    fn apply<'a>(&'a self, resp: &'a mut Response, req: &'a mut Request) -> BoxFuture<'a, bool> {
        (self)(resp, req)
    }
}

/// A hook with a name to find it by and a priority for
/// [`HookList::sort_by_priority`].
#[derive(Clone)]
pub struct NamedHook {
    pub name: String,
    pub apply: Arc<dyn Hook>,
    pub priority: i32,
}

impl NamedHook {
    pub fn new(name: impl Into<String>, hook: impl Hook) -> Self {
        Self { name: name.into(), apply: Arc::new(hook), priority: 0 }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for NamedHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedHook")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Observer called after each hook with the hook's verdict.
pub type AfterEach = Arc<dyn Fn(&NamedHook, bool) + Send + Sync>;

/// An ordered list of hooks for one phase.
#[derive(Clone, Default)]
pub struct HookList {
    hooks: Vec<NamedHook>,
    after_each: Option<AfterEach>,
}

impl fmt::Debug for HookList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.hooks.iter().map(|h| &h.name)).finish()
    }
}

impl HookList {
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hook names in run order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn push_back(&mut self, hook: NamedHook) {
        self.hooks.push(hook);
    }

    pub fn push_front(&mut self, hook: NamedHook) {
        self.hooks.insert(0, hook);
    }

    /// Removes any hook with the same name, then appends.
    pub fn push_back_named(&mut self, hook: NamedHook) {
        self.remove(&hook.name);
        self.push_back(hook);
    }

    /// Removes any hook with the same name, then prepends.
    pub fn push_front_named(&mut self, hook: NamedHook) {
        self.remove(&hook.name);
        self.push_front(hook);
    }

    /// Removes every hook called `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.hooks.len();
        self.hooks.retain(|h| h.name != name);
        before - self.hooks.len()
    }

    /// Replaces the hooks called `name` in place. Returns `false` if there
    /// were none.
    pub fn swap(&mut self, name: &str, hook: NamedHook) -> bool {
        let mut swapped = false;
        for slot in self.hooks.iter_mut().filter(|h| h.name == name) {
            *slot = hook.clone();
            swapped = true;
        }
        swapped
    }

    pub fn clear(&mut self) {
        self.hooks.clear();
    }

    /// Stable sort, highest priority first.
    pub fn sort_by_priority(&mut self) {
        self.hooks.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn set_after_each(&mut self, after_each: impl Fn(&NamedHook, bool) + Send + Sync + 'static) {
        self.after_each = Some(Arc::new(after_each));
    }

    /// Runs the hooks in order. Stops at, and returns `false` for, the first
    /// hook that rejects.
    pub async fn run(&self, resp: &mut Response, req: &mut Request) -> bool {
        for hook in &self.hooks {
            let ok = hook.apply.apply(resp, req).await;
            if let Some(after_each) = &self.after_each {
                after_each(hook, ok);
            }
            if !ok {
                return false;
            }
        }
        true
    }
}

/// The four hook phases of a server.
#[derive(Debug, Clone, Default)]
pub struct ServerHooks {
    pub request_received: HookList,
    pub request_routed: HookList,
    pub response_ready: HookList,
    pub response_always: HookList,
}

/// Writes an admission rejection with a `Retry-After` timestamp.
pub(crate) fn reject(resp: &mut Response, status: StatusCode, retry_in: Duration) {
    match retry_after(retry_in) {
        Some(value) => resp.set_header(RETRY_AFTER, value),
        None => tracing::warn!(?retry_in, "could not render Retry-After"),
    }
    resp.set_content_type(ContentType::Text);
    resp.write_header(status);
    resp.write(status.canonical_reason().unwrap_or_default().as_bytes());
}

/// `now + retry_in` as an RFC 3339 header value.
fn retry_after(retry_in: Duration) -> Option<HeaderValue> {
    let at = OffsetDateTime::now_utc().checked_add(retry_in.try_into().ok()?)?;
    let formatted = at.format(&Rfc3339).ok()?;
    HeaderValue::from_str(&formatted).ok()
}
