//! Concurrency capping with a timer-refilled token pool.
//!
//! The pool starts with `max` tokens. Every admitted request consumes one
//! for good; a background ticker puts `max / window` tokens back (at least
//! one, never above `max`) every `window / max`, the first of them one period
//! after the pool last ran dry. A request that finds the pool empty waits
//! until one `window` after that drain for a token and is then turned away
//! with `429 Too Many Requests`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use http::StatusCode;
use parking_lot::{Mutex, Once};
use tokio::sync::{watch, Semaphore, SemaphorePermit, TryAcquireError};
use tokio::time::{self, Instant};

use super::{reject, BoxFuture, Hook, NamedHook};
use crate::request::Request;
use crate::response::Response;

/// Name the demotion hook is registered under.
pub const DEMOTION_HOOK: &str = "demotion";

/// Builds the demotion hook. See [`Demotion::new`].
pub fn server_demotion_hook(
    max: u32,
    window: Duration,
    stop: watch::Receiver<bool>,
    bypass: Option<String>,
) -> NamedHook {
    let mut demotion = Demotion::new(max, window, stop);
    if let Some(key) = bypass {
        demotion = demotion.with_bypass(key);
    }
    NamedHook::new(DEMOTION_HOOK, demotion)
}

struct Pool {
    tokens: Semaphore,
    /// When the last token was taken. Guards every take.
    drained: Mutex<Instant>,
}

impl Pool {
    /// Consumes `permit`, recording the drain if it was the last token.
    /// Callers hold the `drained` lock.
    fn consume(&self, permit: SemaphorePermit<'_>, drained: &mut Instant) {
        permit.forget();
        if self.tokens.available_permits() == 0 {
            *drained = Instant::now();
        }
    }
}

pub struct Demotion {
    pool: Arc<Pool>,
    capacity: usize,
    per_tick: usize,
    period: Duration,
    window: Duration,
    bypass: Option<String>,
    stop: watch::Receiver<bool>,
    ticker: Once,
}

impl Demotion {
    /// Creates a full pool. Its refill ticker is spawned on the first
    /// request, so construction needs no runtime. The ticker ends when
    /// `stop` flips to `true`, when its sender is dropped, or on the first
    /// tick after the hook itself is dropped.
    ///
    /// # Panics
    ///
    /// If `max` or `window` is zero.
    pub fn new(max: u32, window: Duration, stop: watch::Receiver<bool>) -> Self {
        assert!(max > 0, "demotion needs at least one token");
        assert!(!window.is_zero(), "demotion needs a positive window");

        let capacity = max as usize;
        Self {
            pool: Arc::new(Pool { tokens: Semaphore::new(capacity), drained: Mutex::new(Instant::now()) }),
            capacity,
            per_tick: ((f64::from(max) / window.as_secs_f64()) as usize).max(1),
            period: window / max,
            window,
            bypass: None,
            stop,
            ticker: Once::new(),
        }
    }

    /// Requests carrying the query parameter `key` skip the pool.
    pub fn with_bypass(mut self, key: impl Into<String>) -> Self {
        self.bypass = Some(key.into());
        self
    }

    /// Tokens currently available.
    pub fn available(&self) -> usize {
        self.pool.tokens.available_permits()
    }

    fn start_ticker(&self) {
        self.ticker.call_once(|| {
            tokio::spawn(refill(
                Arc::downgrade(&self.pool),
                self.capacity,
                self.per_tick,
                self.period,
                self.stop.clone(),
            ));
        });
    }

    async fn admit(&self) -> bool {
        self.start_ticker();

        let drained = {
            let mut drained = self.pool.drained.lock();
            match self.pool.tokens.try_acquire() {
                Ok(permit) => {
                    self.pool.consume(permit, &mut drained);
                    return true;
                }
                Err(TryAcquireError::NoPermits) => *drained,
                Err(TryAcquireError::Closed) => {
                    tracing::error!("demotion pool closed");
                    return false;
                }
            }
        };

        // tokens injected once the drained window is over belong to later requests
        let deadline = drained + self.window;
        match time::timeout_at(deadline, self.pool.tokens.acquire()).await {
            Ok(Ok(permit)) if Instant::now() < deadline => {
                self.pool.consume(permit, &mut self.pool.drained.lock());
                true
            }
            // dropping the late permit hands the token back
            Ok(Ok(_)) => false,
            Ok(Err(e)) => {
                tracing::error!("demotion pool unavailable: {e}");
                false
            }
            Err(_) => false,
        }
    }
}

impl Hook for Demotion {
    fn apply<'a>(&'a self, resp: &'a mut Response, req: &'a mut Request) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if let Some(key) = &self.bypass {
                if req.has_query(key) {
                    return true;
                }
            }
            if self.admit().await {
                return true;
            }
            tracing::debug!(path = req.path(), "demoted");
            reject(resp, StatusCode::TOO_MANY_REQUESTS, self.window);
            false
        })
    }
}

async fn refill(
    pool: Weak<Pool>,
    capacity: usize,
    per_tick: usize,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    if *stop.borrow_and_update() {
        return;
    }
    let Some(mut next) = pool.upgrade().map(|pool| *pool.drained.lock() + period) else {
        return;
    };

    loop {
        tokio::select! {
            _ = time::sleep_until(next) => {
                let Some(pool) = pool.upgrade() else { break };
                let resume = *pool.drained.lock() + period;
                if next < resume {
                    next = resume;
                    continue;
                }
                let room = capacity.saturating_sub(pool.tokens.available_permits());
                pool.tokens.add_permits(per_tick.min(room));
                next += period;
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow_and_update() {
                    break;
                }
            }
        }
    }
    tracing::debug!("demotion ticker stopped");
}
