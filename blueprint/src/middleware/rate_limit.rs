//! Per-IP token-bucket rate limiting
//!
//! Each client IP gets its own governor bucket: capacity `burst` (default 5),
//! refilled at the configured per-minute rate. Requests over the limit get
//! HTTP 429.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::context::RequestContext;
use crate::config::RateLimitConfig;
use crate::responses::http_429;

type IpLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimit {
    config: RateLimitConfig,
    limiters: Arc<DashMap<String, Arc<IpLimiter>>>,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: Arc::new(DashMap::new()),
        }
    }

    fn quota(&self) -> Quota {
        let rate = NonZeroU32::new(self.config.requests_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.config.burst.max(1)).unwrap_or(NonZeroU32::MIN);
        Quota::per_minute(rate).allow_burst(burst)
    }

    fn limiter_for(&self, ip: &str) -> Arc<IpLimiter> {
        self.limiters
            .entry(ip.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota())))
            .clone()
    }

    /// Whether a request from `ip` may proceed right now
    pub fn check(&self, ip: &str) -> bool {
        self.limiter_for(ip).check().is_ok()
    }

    /// Middleware function; install with `from_fn_with_state`
    pub async fn middleware(
        State(limit): State<RateLimit>,
        request: Request,
        next: Next,
    ) -> Response {
        if !limit.config.enabled {
            return next.run(request).await;
        }

        let ip = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.client_ip.clone())
            .unwrap_or_else(|| "unknown".to_string());

        if !limit.check(&ip) {
            tracing::warn!(client_ip = %ip, path = %request.uri().path(), "rate limit exceeded");
            return http_429("Too many requests");
        }

        next.run(request).await
    }
}
