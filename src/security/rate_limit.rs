//! Per-client rate limiting.
//!
//! Each client identity gets its own token bucket, created on the first
//! request seen from it. Identity comes from the `client-id` request header.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::observability::metrics::Collector;

/// Request header carrying the caller identity.
pub const CLIENT_ID_HEADER: &str = "client-id";

/// Identity used when a request carries none.
pub const UNKNOWN_CLIENT: &str = "unknown-client";

/// The caller exceeded its request rate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded for client: {client}")]
pub struct RateLimited {
    pub client: String,
}

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// A continuous-refill token bucket.
///
/// Starts full. Tokens accrue at `rate` per second up to `burst`.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        Self::new_at(rate, burst, Instant::now())
    }

    fn new_at(rate: f64, burst: u32, now: Instant) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_update: now,
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Take one token if available at `now`. A denied call takes nothing.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.lock();

        let elapsed = now.saturating_duration_since(state.last_update).as_secs_f64();
        if now > state.last_update {
            state.last_update = now;
        }

        // Refill tokens
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, without refilling.
    pub fn tokens(&self) -> f64 {
        self.lock().tokens
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("tokens", &self.tokens())
            .finish()
    }
}

/// Rate limiter keeping one [`TokenBucket`] per client identity.
///
/// Buckets are never evicted; the map grows with the number of distinct
/// identities seen over the process lifetime.
#[derive(Debug)]
pub struct PerClientRateLimiter {
    clients: Mutex<HashMap<String, Arc<TokenBucket>>>,
    rps: f64,
    burst: u32,
    admitted: AtomicU64,
    denied: AtomicU64,
}

impl PerClientRateLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            rps,
            burst,
            admitted: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst_size)
    }

    /// Bucket for `client_id`, created on first use.
    ///
    /// Lookup and insert happen under one lock so concurrent first requests
    /// from the same client share a bucket.
    pub fn limiter(&self, client_id: &str) -> Arc<TokenBucket> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(bucket) = clients.get(client_id) {
            return bucket.clone();
        }

        tracing::debug!(client = %client_id, rps = self.rps, burst = self.burst, "New client limiter");
        let bucket = Arc::new(TokenBucket::new(self.rps, self.burst));
        clients.insert(client_id.to_string(), bucket.clone());
        bucket
    }

    /// Consume one token for `client_id`.
    pub fn admit(&self, client_id: &str) -> Result<(), RateLimited> {
        if self.limiter(client_id).try_acquire() {
            self.admitted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(client = %client_id, "Rate limit exceeded");
            Err(RateLimited {
                client: client_id.to_string(),
            })
        }
    }

    /// Admit the request described by `headers`, then run `handler`.
    ///
    /// On denial the handler is not called. Otherwise its result is returned
    /// as is.
    pub async fn intercept<F, Fut, T, E>(&self, headers: &HeaderMap, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<RateLimited>,
    {
        self.admit(client_id(headers))?;
        handler().await
    }

    /// Number of distinct clients seen.
    pub fn client_count(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn admitted_total(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn denied_total(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }
}

impl Collector for PerClientRateLimiter {
    fn name(&self) -> &str {
        "rate_limiter"
    }

    fn collect(&self) {
        metrics::gauge!("rate_limiter_clients").set(self.client_count() as f64);
        metrics::counter!("rate_limiter_admitted_total").absolute(self.admitted_total());
        metrics::counter!("rate_limiter_denied_total").absolute(self.denied_total());
    }
}

/// Client identity of a request: the first `client-id` value as sent, or
/// [`UNKNOWN_CLIENT`] when absent or not visible ASCII.
pub fn client_id(headers: &HeaderMap) -> &str {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(UNKNOWN_CLIENT)
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: u16,
    status: &'static str,
    message: String,
    error_id: String,
    details: ErrorDetails<'a>,
}

#[derive(Serialize)]
struct ErrorDetails<'a> {
    client: &'a str,
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            status: "RESOURCE_EXHAUSTED",
            message: self.to_string(),
            error_id: uuid::Uuid::new_v4().to_string(),
            details: ErrorDetails {
                client: &self.client,
            },
        };

        (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
    }
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<PerClientRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match limiter.admit(client_id(request.headers())) {
        Ok(()) => next.run(request).await,
        Err(denied) => denied.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    #[test]
    fn test_bucket_burst_then_refill() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(2.0, 2, start);

        assert!(bucket.try_acquire_at(start));
        assert!(bucket.try_acquire_at(start));
        assert!(!bucket.try_acquire_at(start));

        // One token per 1/rate seconds.
        let later = start + Duration::from_millis(500);
        assert!(bucket.try_acquire_at(later));
        assert!(!bucket.try_acquire_at(later));
    }

    #[test]
    fn test_bucket_caps_at_burst() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(10.0, 3, start);

        let much_later = start + Duration::from_secs(60);
        for _ in 0..3 {
            assert!(bucket.try_acquire_at(much_later));
        }
        assert!(!bucket.try_acquire_at(much_later));
    }

    #[test]
    fn test_denial_consumes_nothing() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(1.0, 1, start);
        assert!(bucket.try_acquire_at(start));

        let half = start + Duration::from_millis(500);
        assert!(!bucket.try_acquire_at(half));
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);

        assert!(bucket.try_acquire_at(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_zero_burst_never_admits() {
        let bucket = TokenBucket::new(100.0, 0);
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_limiter_is_shared_per_client() {
        let limiter = PerClientRateLimiter::new(1.0, 1);
        let a = limiter.limiter("a");
        let again = limiter.limiter("a");
        let b = limiter.limiter("b");

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(limiter.client_count(), 2);
    }

    #[test]
    fn test_clients_do_not_share_quota() {
        let limiter = PerClientRateLimiter::new(0.001, 2);
        assert!(limiter.admit("a").is_ok());
        assert!(limiter.admit("a").is_ok());
        assert_eq!(
            limiter.admit("a"),
            Err(RateLimited {
                client: "a".to_string()
            })
        );

        assert!(limiter.admit("b").is_ok());
        assert!(limiter.admit("b").is_ok());
        assert_eq!(limiter.admitted_total(), 4);
        assert_eq!(limiter.denied_total(), 1);
    }

    #[test]
    fn test_concurrent_first_requests_create_one_bucket() {
        let limiter = Arc::new(PerClientRateLimiter::new(0.001, 5));
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    limiter.admit("same").is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 5);
        assert_eq!(limiter.client_count(), 1);
    }

    #[test]
    fn test_client_id_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_id(&headers), UNKNOWN_CLIENT);

        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_bytes(b"caf\xe9").unwrap());
        assert_eq!(client_id(&headers), UNKNOWN_CLIENT);

        // Sent values are used verbatim, empty included.
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(client_id(&headers), "");

        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("billing"));
        headers.append(CLIENT_ID_HEADER, HeaderValue::from_static("other"));
        assert_eq!(client_id(&headers), "billing");
    }

    #[derive(Debug, PartialEq)]
    enum HandlerError {
        Exhausted(String),
        Failed,
    }

    impl From<RateLimited> for HandlerError {
        fn from(e: RateLimited) -> Self {
            HandlerError::Exhausted(e.client)
        }
    }

    #[tokio::test]
    async fn test_intercept_forwards_and_short_circuits() {
        let limiter = PerClientRateLimiter::new(0.001, 1);
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("x"));

        let first: Result<u32, HandlerError> =
            limiter.intercept(&headers, || async { Err(HandlerError::Failed) }).await;
        assert_eq!(first, Err(HandlerError::Failed));

        let mut called = false;
        let second: Result<u32, HandlerError> = limiter
            .intercept(&headers, || {
                called = true;
                async { Ok(1) }
            })
            .await;
        assert_eq!(second, Err(HandlerError::Exhausted("x".into())));
        assert!(!called);
    }
}
