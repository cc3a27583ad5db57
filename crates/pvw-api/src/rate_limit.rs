//! Per-client rate limiting.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
    Json,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::AppState;

/// Rate limiter keyed by client address.
pub type ClientRateLimiter = DefaultKeyedRateLimiter<String>;

/// `requests` per `period` per client; `None` when either is zero.
pub fn build_limiter(requests: u32, period: Duration) -> Option<ClientRateLimiter> {
    let burst = NonZeroU32::new(requests)?;
    let quota = Quota::with_period(period / requests)?.allow_burst(burst);
    Some(RateLimiter::keyed(quota))
}

/// Client key: the peer address when the server records it, otherwise the
/// first `X-Forwarded-For` entry.
fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if let Some(limiter) = &state.rate_limiter {
        let key = client_key(&request);
        if limiter.check_key(&key).is_err() {
            tracing::warn!(subsystem = "api", client = %key, "Rate limit exceeded");
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "Too many requests. Please wait before retrying."
                })),
            ));
        }
    }
    Ok(next.run(request).await)
}
