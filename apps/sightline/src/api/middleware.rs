//! # Middleware Module
//!
//! Rate limiting for the Sightline HTTP API.
//!
//! One global token bucket is shared by every route. Text routes cost one
//! token; `/reconcile` runs a whole interpretation and costs
//! [`RECONCILE_COST`]. `/health` is free.
//!
//! ## Configuration
//!
//! - `SIGHTLINE_RATE_LIMIT`: Tokens per second (default: 20, 0 disables)

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Environment variable holding the rate limit.
pub const RATE_LIMIT_ENV: &str = "SIGHTLINE_RATE_LIMIT";

const DEFAULT_RPS: NonZeroU32 = NonZeroU32::new(20).expect("nonzero literal");

/// Tokens charged for one `/reconcile` request.
pub const RECONCILE_COST: NonZeroU32 = NonZeroU32::new(5).expect("nonzero literal");

const UNIT_COST: NonZeroU32 = NonZeroU32::MIN;

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Shared token bucket.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Bucket refilling `tokens_per_second`, with a burst of the same size.
/// Zero falls back to the default.
pub fn create_rate_limiter(tokens_per_second: u32) -> GlobalRateLimiter {
    let rate = NonZeroU32::new(tokens_per_second).unwrap_or(DEFAULT_RPS);
    Arc::new(RateLimiter::direct(Quota::per_second(rate)))
}

/// `SIGHTLINE_RATE_LIMIT`, or the default when unset or malformed.
pub fn get_rate_limit_from_env() -> u32 {
    std::env::var(RATE_LIMIT_ENV)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_RPS.get())
}

/// Tokens a request to `path` costs, or `None` when it is not metered.
pub fn route_cost(path: &str) -> Option<NonZeroU32> {
    match path {
        "/health" => None,
        "/reconcile" => Some(RECONCILE_COST),
        _ => Some(UNIT_COST),
    }
}

/// Whether `limiter` can pay `cost` right now. A cost larger than the whole
/// bucket can never be paid.
fn try_spend(limiter: &GlobalRateLimiter, cost: NonZeroU32) -> bool {
    matches!(limiter.check_n(cost), Ok(Ok(())))
}

/// Reject with 429 when the bucket cannot pay for the request.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(cost) = route_cost(request.uri().path()) else {
        return Ok(next.run(request).await);
    };

    if try_spend(&limiter, cost) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(
            path = %request.uri().path(),
            cost = cost.get(),
            "Rate limit exceeded"
        );
        Err((StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"))
    }
}
