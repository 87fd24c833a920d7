//! Reactions to quota failure and denial.
//!
//! Handlers turn a halted request into the response the caller sees. They run instead of the
//! downstream service, never before it, so the inner service is not called once one of them
//! has produced a response.

use crate::quota::QuotaVerdict;
use crate::QuotaError;
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use http::request::Parts;
use http::{Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

/// Rate limit header names.
pub mod headers {
    use http::header::HeaderName;

    /// Units granted per window.
    pub const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    /// Units left in the current window.
    pub const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
    /// Seconds until the window resets.
    pub const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
}

/// Body of the default denial response.
pub const LIMIT_EXCEEDED_BODY: &str = "Limit exceeded";
/// Body of the default quota failure response.
pub const LIMITER_ERROR_BODY: &str = "Limiter error";

/// Produces the response for a request whose quota check failed.
pub type ErrorHandler<B> = Arc<dyn Fn(&Parts, &QuotaError) -> Response<B> + Send + Sync>;

/// Produces the response for a request whose quota is exhausted.
pub type LimitReachedHandler<B> = Arc<dyn Fn(&Parts, &QuotaVerdict) -> Response<B> + Send + Sync>;

/// Marker placed in the extensions of every denial response.
///
/// Lets enclosing layers tell a "too many requests" response produced here apart from one the
/// application produced itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitReached {
    /// Key whose quota was exhausted.
    pub key: String,
    /// The verdict that denied the request.
    pub verdict: QuotaVerdict,
}

/// `500 Internal Server Error` with a generic body. The error itself is not exposed.
pub fn default_error_response<B>(_parts: &Parts, _error: &QuotaError) -> Response<B>
where
    B: From<&'static str>,
{
    let mut res = Response::new(B::from(LIMITER_ERROR_BODY));
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res
}

/// `429 Too Many Requests` with `Retry-After` and the rate limit headers.
pub fn default_limit_reached_response<B>(_parts: &Parts, verdict: &QuotaVerdict) -> Response<B>
where
    B: From<&'static str>,
{
    let mut res = Response::new(B::from(LIMIT_EXCEEDED_BODY));
    *res.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let h = res.headers_mut();
    h.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(verdict.reset_after)));
    insert_rate_limit_headers(h, verdict);
    res
}

/// Write `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset` from `verdict`.
pub fn insert_rate_limit_headers(h: &mut HeaderMap, verdict: &QuotaVerdict) {
    let entries: [(HeaderName, u64); 3] = [
        (headers::LIMIT, verdict.limit),
        (headers::REMAINING, verdict.remaining),
        (headers::RESET, retry_after_secs(verdict.reset_after)),
    ];
    for (name, value) in entries {
        h.insert(name, HeaderValue::from(value));
    }
}

/// Whole seconds, rounded up so a client never retries before the window resets.
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
