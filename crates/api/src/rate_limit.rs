use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter per client IP
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clients: DashMap<IpAddr, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: DashMap::new(),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Count one request from `ip`. Returns false once the window is full.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.clients.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop windows that have already elapsed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.clients
            .retain(|_, w| now.duration_since(w.started) < self.window);
    }
}

fn client_ip(req: &Request) -> IpAddr {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Per-IP rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if !state.rate_limiter.check(ip) {
        warn!("Rate limit exceeded for {} on {}", ip, req.uri().path());
        return ApiError::RateLimitExceeded.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_per_client() {
        let limiter = RateLimiter::per_minute(3);
        let a: IpAddr = "203.0.113.1".parse().unwrap();
        let b: IpAddr = "203.0.113.2".parse().unwrap();

        for _ in 0..3 {
            assert!(limiter.check(a));
        }
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        let ip: IpAddr = "203.0.113.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check(ip));
    }

    #[test]
    fn test_purge_expired() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check("203.0.113.1".parse().unwrap());
        std::thread::sleep(Duration::from_millis(20));
        limiter.purge_expired();
        assert!(limiter.clients.is_empty());
    }
}
