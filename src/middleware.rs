//! Request-path middleware: client IP extraction, fixed-window rate
//! limiting, and request logging (spec §4.4, §4.5, §4.9). Built on
//! `axum::middleware::from_fn_with_state`, the same seam the teacher
//! reaches for ad hoc auth checks in `services/server/src/auth.rs`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use std::net::SocketAddr;

use crate::http::response::too_many_requests;
use crate::state::AppState;

/// First hop of `X-Forwarded-For`, falling back to the socket peer address
/// (spec §4.4 — "extract client IP from trusted forwarding headers").
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_owned();
            }
        }
    }
    peer.map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_owned())
}

/// Collapses a concrete request path to the endpoint key the rate limiter
/// and metrics store use, so that e.g. every `GET /v1/events` request
/// shares one counter regardless of query string.
fn endpoint_key(path: &str) -> String {
    path.to_owned()
}

pub async fn rate_limit(
    State(app): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&headers, Some(peer));
    let endpoint = endpoint_key(request.uri().path());
    let now = Utc::now().timestamp();

    let decision = match app.rate_limiter.check(&ip, &endpoint, now) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "rate limiter store error, allowing request");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        let mut response = too_many_requests("rate limit exceeded");
        insert_rate_limit_headers(response.headers_mut(), &decision);
        if let Ok(v) = (decision.reset_at - now).max(0).to_string().parse() {
            response.headers_mut().insert("retry-after", v);
        }
        return response;
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn insert_rate_limit_headers(headers: &mut axum::http::HeaderMap, decision: &crate::ratelimit::RateLimitDecision) {
    if let Ok(v) = decision.limit.to_string().parse() {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = decision.remaining.to_string().parse() {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = decision.reset_at.to_string().parse() {
        headers.insert("x-ratelimit-reset", v);
    }
}

pub async fn log_request(
    State(app): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let endpoint = endpoint_key(request.uri().path());
    let ip = client_ip(&headers, Some(peer));
    let user_agent = headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_owned);
    let started = Instant::now();

    let response = next.run(request).await;

    let duration_ms = started.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    if let Err(e) = app.metrics.log_request(&endpoint, &method, status, duration_ms, &ip, user_agent.as_deref()) {
        tracing::warn!(error = %e, "request log write failed");
    }
    response
}

pub fn bearer_or_query_auth(headers: &HeaderMap, query_auth: Option<&str>, secret: &str) -> bool {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer == Some(secret) || query_auth == Some(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.5, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "203.0.113.5");
    }

    #[test]
    fn client_ip_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "127.0.0.1");
    }

    #[test]
    fn bearer_or_query_auth_accepts_either_form() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer s3cr3t".parse().unwrap());
        assert!(bearer_or_query_auth(&headers, None, "s3cr3t"));
        assert!(bearer_or_query_auth(&HeaderMap::new(), Some("s3cr3t"), "s3cr3t"));
        assert!(!bearer_or_query_auth(&HeaderMap::new(), Some("wrong"), "s3cr3t"));
    }
}
