//! Token-bucket rate limiting.
//!
//! Admits `max` requests per second with a burst of 20% of `max` (at least
//! one). Time is cut into refill intervals starting at the instant the
//! bucket last ran dry. A request that finds the bucket empty may wait for
//! a token that matures before the current interval ends; otherwise it is
//! turned away with `418 I'm a teapot`.

use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{reject, BoxFuture, Hook, NamedHook};
use crate::request::Request;
use crate::response::Response;

/// Name the throttle hook is registered under.
pub const THROTTLE_HOOK: &str = "throttle";

/// Float slack when comparing a token's maturity with an interval boundary.
const BOUNDARY_SLACK: f64 = 1e-6;

/// Builds the throttle hook for `max` requests per second.
pub fn server_throttle_hook(max: u32) -> NamedHook {
    NamedHook::new(THROTTLE_HOOK, Throttle::new(max))
}

struct Bucket {
    tokens: f64,
    last: Instant,
    /// When a take last left less than one whole token.
    drained: Instant,
}

pub struct Throttle {
    bucket: Mutex<Bucket>,
    rate: f64,
    burst: f64,
    interval: Duration,
}

impl Throttle {
    /// # Panics
    ///
    /// If `max` is zero.
    pub fn new(max: u32) -> Self {
        assert!(max > 0, "throttle needs a positive rate");
        let burst = (u64::from(max) * 20 / 100).max(1) as f64;
        let now = Instant::now();
        Self {
            bucket: Mutex::new(Bucket { tokens: burst, last: now, drained: now }),
            rate: f64::from(max),
            burst,
            interval: Duration::from_secs(1) / max,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    /// Reserves one token. Returns how long the caller must wait for it, or
    /// `None` if it would not mature before the end of the current interval.
    ///
    /// Tokens may go negative: each admitted waiter holds a claim on a future
    /// token, so later callers queue behind it.
    fn reserve(&self) -> Option<f64> {
        let now = Instant::now();
        let mut bucket = self.bucket.lock();

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last = now;

        let remaining = bucket.tokens - 1.0;
        if remaining >= 0.0 {
            bucket.tokens = remaining;
            if remaining < 1.0 {
                bucket.drained = now;
            }
            return Some(0.0);
        }

        let wait = -remaining / self.rate;
        let interval = 1.0 / self.rate;
        let since_drained = now.saturating_duration_since(bucket.drained).as_secs_f64();
        let left_in_interval = interval - since_drained % interval;
        if wait + BOUNDARY_SLACK >= left_in_interval {
            return None;
        }
        bucket.tokens = remaining;
        Some(wait)
    }

    async fn admit(&self) -> bool {
        let Some(wait) = self.reserve() else {
            return false;
        };
        if wait > 0.0 {
            match Duration::try_from_secs_f64(wait) {
                Ok(wait) => tokio::time::sleep(wait).await,
                Err(e) => {
                    tracing::error!(wait, "throttle produced an invalid wait: {e}");
                    return false;
                }
            }
        }
        true
    }
}

impl Hook for Throttle {
    fn apply<'a>(&'a self, resp: &'a mut Response, req: &'a mut Request) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if self.admit().await {
                return true;
            }
            tracing::debug!(path = req.path(), "throttled");
            reject(resp, StatusCode::IM_A_TEAPOT, self.interval * 3);
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::header::RETRY_AFTER;

    use super::*;

    async fn fire(throttle: &Arc<Throttle>, n: usize) -> Vec<Response> {
        let tasks: Vec<_> = (0..n)
            .map(|_| {
                let throttle = Arc::clone(throttle);
                tokio::spawn(async move {
                    let mut resp = Response::new();
                    let mut req = Request::default();
                    if throttle.apply(&mut resp, &mut req).await {
                        resp.write_header(StatusCode::NO_CONTENT);
                        resp.flush_header();
                    }
                    resp
                })
            })
            .collect();

        let mut out = Vec::with_capacity(n);
        for task in tasks {
            out.push(task.await.unwrap());
        }
        out
    }

    #[test]
    fn burst_is_a_fifth_of_max_but_at_least_one() {
        assert_eq!(Throttle::new(1).burst(), 1);
        assert_eq!(Throttle::new(50).burst(), 10);
        assert_eq!(Throttle::new(50).interval(), Duration::from_millis(20));
        assert_eq!(Throttle::new(u32::MAX).burst(), 858_993_459);
    }

    #[tokio::test(start_paused = true)]
    async fn one_per_second_admits_exactly_one_of_three() {
        let throttle = Arc::new(Throttle::new(1));
        let responses = fire(&throttle, 3).await;

        let ok = responses.iter().filter(|r| r.status() == StatusCode::NO_CONTENT).count();
        assert_eq!(ok, 1);
        for resp in responses.iter().filter(|r| r.status() != StatusCode::NO_CONTENT) {
            assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
            assert_eq!(resp.body(), b"I'm a teapot");
            assert!(resp.headers().contains_key(RETRY_AFTER));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_arrivals_in_the_drained_interval_are_rejected() {
        let throttle = Arc::new(Throttle::new(1));
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(fire(&throttle, 1).await[0].status(), StatusCode::NO_CONTENT);

        for step in [10, 200, 480] {
            tokio::time::advance(Duration::from_millis(step)).await;
            assert_eq!(fire(&throttle, 1).await[0].status(), StatusCode::IM_A_TEAPOT, "after {step}ms");
        }

        // a full interval after the drain the token is back
        tokio::time::advance(Duration::from_millis(320)).await;
        assert_eq!(fire(&throttle, 1).await[0].status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_over_time() {
        let throttle = Arc::new(Throttle::new(10));
        let first = fire(&throttle, 5).await;
        let ok = first.iter().filter(|r| r.status() == StatusCode::NO_CONTENT).count();
        assert_eq!(ok, 2);

        tokio::time::advance(Duration::from_millis(100)).await;
        let later = fire(&throttle, 1).await;
        assert_eq!(later[0].status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_admitted_when_token_matures_inside_the_interval() {
        let throttle = Throttle::new(10);
        assert!(throttle.admit().await);
        assert!(throttle.admit().await);

        // 1.3 tokens at 130ms; taking one leaves 0.3 and restarts the interval
        tokio::time::advance(Duration::from_millis(130)).await;
        assert!(throttle.admit().await);

        // 0.4 tokens at 140ms: the next one matures at 200ms, before 230ms
        tokio::time::advance(Duration::from_millis(10)).await;
        let started = Instant::now();
        assert!(throttle.admit().await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(59) && waited <= Duration::from_millis(61), "{waited:?}");

        // at 200ms the following token matures at 300ms, past 230ms
        assert!(!throttle.admit().await);
    }
}
