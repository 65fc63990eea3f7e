//! Fixed-window rate limiting per client address.
//!
//! # Algorithm
//!
//! 1. The client key is [`Request::client_ip`].
//! 2. The store records a hit: if the key has no counter or its window has
//!    passed (`now > reset_at`), the counter restarts at 1 with
//!    `reset_at = now + window`; otherwise it is incremented.
//! 3. A count above `max_requests` short-circuits with `429` and
//!    `retryAfter = ceil((reset_at - now) / 1000)` seconds.
//!
//! Windows reset lazily on the next hit. The store is injected, so a
//! single instance can use [`MemoryStore`] and a fleet can share an external
//! cache behind the same [`RateLimitStore`] trait. Store failures fail open.

use std::collections::HashMap;
use std::future::{Future, ready};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::api_error::ApiError;
use crate::boundary::ErrorBoundary;
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::Error;
use crate::handler::Endpoint;
use crate::request::Request;
use crate::request_log::RequestContext;

use super::Middleware;

/// Requests seen in the current window and when the window ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u32,
    /// Epoch milliseconds.
    pub reset_at: i64,
}

impl Counter {
    fn fresh(now: i64, window_ms: i64) -> Self {
        Self { count: 1, reset_at: now.saturating_add(window_ms) }
    }

    fn expired(&self, now: i64) -> bool {
        now > self.reset_at
    }
}

/// Backing storage for rate-limit counters.
pub trait RateLimitStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send;

    fn set(&self, key: &str, counter: Counter) -> impl Future<Output = Result<(), Error>> + Send;

    /// Adds one to an existing counter. `None` if the key is absent.
    fn increment(&self, key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send;

    /// Records one request and returns the counter after it.
    ///
    /// The default is built from `get` / `set` / `increment` and is not
    /// atomic across concurrent hits on the same key. Stores that can do
    /// better should override it.
    fn hit(
        &self,
        key: &str,
        now: i64,
        window_ms: i64,
    ) -> impl Future<Output = Result<Counter, Error>> + Send {
        async move {
            if let Some(current) = self.get(key).await? {
                if !current.expired(now) {
                    if let Some(counter) = self.increment(key).await? {
                        return Ok(counter);
                    }
                }
            }
            let counter = Counter::fresh(now, window_ms);
            self.set(key, counter).await?;
            Ok(counter)
        }
    }
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

/// In-process store for single-instance deployments.
///
/// Holds at most `capacity` keys. Inserting a new key into a full store
/// first drops expired counters, then the counter closest to its reset.
#[derive(Debug)]
pub struct MemoryStore {
    counters: Mutex<HashMap<String, Counter>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self { counters: Mutex::new(HashMap::new()), capacity: capacity.max(1) }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every counter whose window has passed. Returns how many.
    pub fn sweep_expired(&self, now: i64) -> usize {
        let mut counters = self.lock();
        let before = counters.len();
        counters.retain(|_, c| !c.expired(now));
        before - counters.len()
    }

    // Counters are plain data, so a panic mid-update cannot leave them
    // inconsistent; keep serving after poisoning.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Counter>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `now` enables the expired sweep; without it only the oldest counter
    /// is evicted.
    fn insert(
        &self,
        counters: &mut HashMap<String, Counter>,
        key: &str,
        counter: Counter,
        now: Option<i64>,
    ) {
        if !counters.contains_key(key) && counters.len() >= self.capacity {
            if let Some(now) = now {
                counters.retain(|_, c| !c.expired(now));
            }
            if counters.len() >= self.capacity {
                let oldest = counters
                    .iter()
                    .min_by_key(|(_, c)| c.reset_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    counters.remove(&oldest);
                }
            }
        }
        counters.insert(key.to_owned(), counter);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(RateLimitConfig::default().max_clients)
    }
}

impl RateLimitStore for MemoryStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send {
        ready(Ok(self.lock().get(key).copied()))
    }

    fn set(&self, key: &str, counter: Counter) -> impl Future<Output = Result<(), Error>> + Send {
        let mut counters = self.lock();
        self.insert(&mut counters, key, counter, None);
        ready(Ok(()))
    }

    fn increment(&self, key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send {
        let mut counters = self.lock();
        let counter = counters.get_mut(key).map(|c| {
            c.count = c.count.saturating_add(1);
            *c
        });
        ready(Ok(counter))
    }

    /// Atomic: the whole read-modify-write happens under one lock.
    fn hit(
        &self,
        key: &str,
        now: i64,
        window_ms: i64,
    ) -> impl Future<Output = Result<Counter, Error>> + Send {
        let mut counters = self.lock();
        let counter = match counters.get_mut(key).filter(|c| !c.expired(now)) {
            Some(c) => {
                c.count = c.count.saturating_add(1);
                *c
            }
            None => {
                let fresh = Counter::fresh(now, window_ms);
                self.insert(&mut counters, key, fresh, Some(now));
                fresh
            }
        };
        ready(Ok(counter))
    }
}

// ── RateLimit middleware ──────────────────────────────────────────────────────

/// Answers `429 Too Many Requests` once a client exceeds `max_requests` in
/// one window.
pub struct RateLimit<S = MemoryStore> {
    store: Arc<S>,
    max_requests: u32,
    window_ms: i64,
    clock: Arc<dyn Clock>,
    boundary: ErrorBoundary,
}

impl RateLimit<MemoryStore> {
    /// Limiter over a fresh [`MemoryStore`] with default capacity.
    pub fn in_memory(max_requests: u32, window: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::default()), max_requests, window)
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new(config.max_clients)), config.max_requests, config.window)
    }
}

impl<S: RateLimitStore> RateLimit<S> {
    pub fn new(store: Arc<S>, max_requests: u32, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            clock: Arc::new(SystemClock),
            boundary: ErrorBoundary::default(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_boundary(mut self, boundary: ErrorBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// The shared store, e.g. for a periodic [`MemoryStore::sweep_expired`].
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

fn retry_after_secs(counter: &Counter, now: i64) -> u64 {
    let remaining = counter.reset_at.saturating_sub(now).max(0) as u64;
    remaining.div_ceil(1000)
}

impl<S: RateLimitStore> Middleware for RateLimit<S> {
    fn wrap(&self, inner: Endpoint) -> Endpoint {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let (max_requests, window_ms, boundary) = (self.max_requests, self.window_ms, self.boundary);

        Endpoint::new(move |req: Request| {
            let inner = inner.clone();
            let store = Arc::clone(&store);
            let clock = Arc::clone(&clock);
            async move {
                let key = req.client_ip();
                let now = clock.now_millis();

                match store.hit(&key, now, window_ms).await {
                    Ok(counter) if counter.count > max_requests => {
                        let err = ApiError::rate_limited(retry_after_secs(&counter, now));
                        return boundary.reject(&RequestContext::from_request(&req), err);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(client = %key, error = %e, "rate-limit store unavailable, allowing request");
                    }
                }
                inner.call(req).await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;
    use crate::clock::ManualClock;
    use crate::method::Method;

    fn clock() -> ManualClock {
        ManualClock::new(DateTime::from_timestamp_millis(1_700_000_000_000).unwrap())
    }

    fn counting_handler(calls: &Arc<AtomicUsize>) -> Endpoint {
        let calls = Arc::clone(calls);
        Endpoint::new(move |_req: Request| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { "ok" }
        })
    }

    fn from(ip: &str) -> Request {
        Request::builder(Method::Get, "/api/products").header("x-forwarded-for", ip).build()
    }

    #[tokio::test]
    async fn fourth_request_in_window_is_rejected_then_window_resets() {
        let clock = clock();
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = RateLimit::in_memory(3, Duration::from_millis(1000))
            .with_clock(clock.clone())
            .wrap(counting_handler(&calls));

        let mut statuses = Vec::new();
        for _ in 0..4 {
            statuses.push(endpoint.call(from("203.0.113.9")).await.status_code());
            clock.advance_millis(100);
        }
        assert_eq!(statuses, vec![200, 200, 200, 429]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        clock.advance_millis(1000);
        assert_eq!(endpoint.call(from("203.0.113.9")).await.status_code(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn rejection_carries_retry_after() {
        let clock = clock();
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = RateLimit::in_memory(1, Duration::from_secs(60))
            .with_clock(clock.clone())
            .wrap(counting_handler(&calls));

        endpoint.call(from("198.51.100.1")).await;
        clock.advance_millis(20_500);
        let res = endpoint.call(from("198.51.100.1")).await;

        assert_eq!(res.status_code(), 429);
        assert_eq!(res.header("retry-after"), Some("40"));
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], json!("Too many requests"));
        assert_eq!(body["type"], json!("RATE_LIMIT_ERROR"));
        assert_eq!(body["retryAfter"], json!(40));
        assert_eq!(body["path"], json!("/api/products"));
        assert!(body["requestId"].is_string());
    }

    #[tokio::test]
    async fn clients_are_counted_separately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = RateLimit::in_memory(1, Duration::from_secs(60))
            .with_clock(clock())
            .wrap(counting_handler(&calls));

        assert_eq!(endpoint.call(from("10.0.0.1")).await.status_code(), 200);
        assert_eq!(endpoint.call(from("10.0.0.2")).await.status_code(), 200);
        assert_eq!(endpoint.call(from("10.0.0.1")).await.status_code(), 429);
    }

    #[tokio::test]
    async fn memory_store_hit_resets_after_window() {
        let store = MemoryStore::new(10);

        assert_eq!(store.hit("k", 0, 1000).await.unwrap(), Counter { count: 1, reset_at: 1000 });
        assert_eq!(store.hit("k", 1000, 1000).await.unwrap(), Counter { count: 2, reset_at: 1000 });
        assert_eq!(store.hit("k", 1001, 1000).await.unwrap(), Counter { count: 1, reset_at: 2001 });
    }

    #[tokio::test]
    async fn full_store_evicts_expired_then_oldest() {
        let store = MemoryStore::new(2);
        store.hit("a", 0, 100).await.unwrap();
        store.hit("b", 50, 1000).await.unwrap();

        // "a" expired at 100: swept to make room.
        store.hit("c", 200, 1000).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").await.unwrap(), None);

        // Nothing expired: "b" resets first and is evicted.
        store.hit("d", 300, 1000).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("b").await.unwrap(), None);
        assert!(store.get("c").await.unwrap().is_some());
        assert!(store.get("d").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_drops_only_expired() {
        let store = MemoryStore::new(10);
        store.hit("old", 0, 100).await.unwrap();
        store.hit("new", 0, 10_000).await.unwrap();

        assert_eq!(store.sweep_expired(500), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("new").await.unwrap().is_some());
    }

    /// Exposes only get/set/increment so `hit` falls back to the default.
    struct Basic(MemoryStore);

    impl RateLimitStore for Basic {
        fn get(&self, key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send {
            self.0.get(key)
        }
        fn set(&self, key: &str, counter: Counter) -> impl Future<Output = Result<(), Error>> + Send {
            self.0.set(key, counter)
        }
        fn increment(&self, key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send {
            self.0.increment(key)
        }
    }

    #[tokio::test]
    async fn default_hit_matches_memory_store() {
        let store = Basic(MemoryStore::new(10));

        assert_eq!(store.hit("k", 0, 1000).await.unwrap().count, 1);
        assert_eq!(store.hit("k", 500, 1000).await.unwrap().count, 2);
        assert_eq!(store.hit("k", 1500, 1000).await.unwrap(), Counter { count: 1, reset_at: 2500 });
    }

    /// A store whose backend is down.
    struct Offline;

    impl RateLimitStore for Offline {
        fn get(&self, _key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send {
            ready(Err(Error::Store("connection refused".into())))
        }
        fn set(&self, _key: &str, _counter: Counter) -> impl Future<Output = Result<(), Error>> + Send {
            ready(Err(Error::Store("connection refused".into())))
        }
        fn increment(&self, _key: &str) -> impl Future<Output = Result<Option<Counter>, Error>> + Send {
            ready(Err(Error::Store("connection refused".into())))
        }
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = RateLimit::new(Arc::new(Offline), 0, Duration::from_secs(1))
            .wrap(counting_handler(&calls));

        assert_eq!(endpoint.call(from("10.0.0.1")).await.status_code(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_window_still_limits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = RateLimit::in_memory(1, Duration::MAX)
            .with_clock(clock())
            .wrap(counting_handler(&calls));

        assert_eq!(endpoint.call(from("10.0.0.1")).await.status_code(), 200);
        assert_eq!(endpoint.call(from("10.0.0.1")).await.status_code(), 429);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn window_end_saturates() {
        let store = MemoryStore::new(10);
        let counter = store.hit("k", 1_700_000_000_000, i64::MAX).await.unwrap();
        assert_eq!(counter, Counter { count: 1, reset_at: i64::MAX });
    }
}
