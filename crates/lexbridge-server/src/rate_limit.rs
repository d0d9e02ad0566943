use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window counter per key.
///
/// `allow` counts the call, starts a fresh window once the current one has
/// elapsed, and refuses once the count exceeds the capacity. The gateway
/// keys it by user id; the HTTP middleware keys it by client IP.
#[derive(Clone)]
pub struct RateLimiter<K> {
    windows: Arc<Mutex<HashMap<K, Window>>>,
    capacity: u32,
    window: Duration,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone + Send,
{
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            window,
        }
    }

    pub async fn allow(&self, key: K) -> bool {
        self.allow_at(key, Instant::now()).await
    }

    pub async fn allow_at(&self, key: K, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.capacity
    }

    /// Drop counters whose window has elapsed; they would reset anyway.
    pub async fn purge_stale(&self) {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
    }

    pub async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter<IpAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = extract_client_ip(&req);

    if let Some(ip) = ip {
        if !limiter.allow(ip).await {
            warn!(ip = %ip, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Try ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for").or_else(|| header_ip("x-real-ip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexbridge_shared::types::UserId;

    #[tokio::test]
    async fn test_thirty_first_call_is_refused() {
        let limiter = RateLimiter::new(30, Duration::from_secs(60));
        let user = UserId::new();
        let start = Instant::now();

        for _ in 0..30 {
            assert!(limiter.allow_at(user, start).await);
        }
        assert!(!limiter.allow_at(user, start + Duration::from_secs(59)).await);

        // A new window starts once the old one has elapsed.
        assert!(limiter.allow_at(user, start + Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let ip1: IpAddr = "10.0.0.1".parse().unwrap();
        let ip2: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.allow(ip1).await);
        assert!(limiter.allow(ip1).await);
        assert!(!limiter.allow(ip1).await);

        assert!(limiter.allow(ip2).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(limiter.allow(ip).await);
        assert_eq!(limiter.tracked().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.purge_stale().await;
        assert_eq!(limiter.tracked().await, 0);
    }

    #[test]
    fn test_forwarded_header() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(extract_client_ip(&req), Some("203.0.113.9".parse().unwrap()));
    }
}
