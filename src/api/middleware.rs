//! Cross-cutting HTTP middleware for the admin surface.
//!
//! Grounded on the teacher's `auth_middleware`/`security_headers_middleware`
//! (bearer-token check, fixed security-header set); the teacher's per-IP
//! `governor` rate limiter is dropped since nothing in SPEC_FULL.md's admin
//! surface calls for it — the scrape/status endpoints are the only
//! unauthenticated ones, and they're idempotent reads.

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// Constant-time byte comparison so token checks don't leak length-dependent
/// timing through early-exit comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Bearer-token auth against `CADENCE_API_TOKEN` for mutating admin routes.
pub async fn auth_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let auth_value = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_value.strip_prefix("Bearer ").ok_or(StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("CADENCE_API_TOKEN").map_err(|_| {
        tracing::error!("CADENCE_API_TOKEN not set; rejecting authenticated request");
        StatusCode::UNAUTHORIZED
    })?;

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        tracing::warn!("admin API auth failed: invalid token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

/// Fixed security headers applied to every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_regular_equality() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
