//! Per-remote-address token bucket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AdmissionConfig;
use crate::error::{ApiError, ErrorType};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

/// Process-wide registry of buckets behind one mutex.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    capacity: f64,
    refill_per_second: f64,
    idle_eviction: Duration,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_second: f64, idle_eviction: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity: f64::from(capacity),
            refill_per_second,
            idle_eviction,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(
            config.rate_limit_capacity,
            config.rate_limit_refill_per_second,
            Duration::from_secs(config.rate_limit_idle_eviction_seconds),
        )
    }

    pub async fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now()).await
    }

    /// Take one token for `key` at `now`; false when the bucket is empty.
    pub async fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_seen).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle for at least the eviction window.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) < self.idle_eviction);
        before - buckets.len()
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }

    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep_at(Instant::now()).await;
                        if evicted > 0 {
                            tracing::debug!(evicted, "evicted idle rate limit buckets");
                        }
                    }
                }
            }
        })
    }
}

/// Remote IP without the port; `unknown` when the listener gave none.
pub fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    if !limiter.check(&key).await {
        metrics::counter!("rate_limit_rejections_total").increment(1);
        tracing::warn!(client = %key, "rate limit exceeded");
        return ApiError::from(ErrorType::TooManyRequests)
            .with_retry_after(1)
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn limiter() -> RateLimiter {
        RateLimiter::new(5, 2.0, Duration::from_secs(180))
    }

    #[tokio::test]
    async fn sixth_request_within_a_second_is_rejected() {
        let limiter = limiter();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at("10.0.0.1", now).await);
        }
        assert!(!limiter.check_at("10.0.0.1", now + Duration::from_millis(100)).await);
        assert!(limiter.check_at("10.0.0.2", now).await);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = limiter();
        let now = Instant::now();
        for _ in 0..5 {
            limiter.check_at("a", now).await;
        }
        assert!(!limiter.check_at("a", now).await);
        assert!(limiter.check_at("a", now + Duration::from_millis(500)).await);
        assert!(!limiter.check_at("a", now + Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn idle_buckets_are_evicted_after_three_minutes() {
        let limiter = limiter();
        let now = Instant::now();
        for _ in 0..6 {
            limiter.check_at("a", now).await;
        }
        assert_eq!(limiter.sweep_at(now + Duration::from_secs(179)).await, 0);
        assert_eq!(limiter.sweep_at(now + Duration::from_secs(180)).await, 1);
        assert_eq!(limiter.len().await, 0);
        assert!(limiter.check_at("a", now + Duration::from_secs(181)).await);
    }

    #[tokio::test]
    async fn middleware_returns_429_json() {
        let limiter = Arc::new(RateLimiter::new(1, 0.001, Duration::from_secs(180)));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(limiter, rate_limit));

        let first = app
            .clone()
            .oneshot(HttpRequest::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(HttpRequest::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Too many requests");
    }
}
