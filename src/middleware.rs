use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::GatekeeperError;
use crate::rate_limiter::RateLimiter;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Identifier assigned to each request by [`logging_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Tags the request with an id and logs it once the response is ready.
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let client_ip = client_ip(&request);
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(
        target: "gatekeeper::middleware",
        request_id = %request_id,
        method = %method,
        path = %path,
        query = %query,
        client_ip = %client_ip,
        user_agent = %user_agent,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "HTTP request"
    );

    response
}

/// Admits or rejects the request before it reaches routing.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = client_ip(&request);

    if !limiter.allow(&client_ip) {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(|RequestId(id)| id.as_str())
            .unwrap_or("-");
        warn!(
            target: "gatekeeper::middleware",
            request_id = %request_id,
            client_ip = %client_ip,
            path = %request.uri().path(),
            method = %request.method(),
            "Rate limit exceeded"
        );
        return GatekeeperError::RateLimitExceeded.into_response();
    }

    next.run(request).await
}

/// Client identifier used as the rate limit key.
///
/// Looks at the first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// peer address. Header values only count when they parse as an IP address.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(parse_ip);
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_ip);
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_get_client_ip_with_forwarded_header() {
        let mut request = Request::new(Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        assert_eq!(client_ip(&request), "192.168.1.1");
    }

    #[test]
    fn test_get_client_ip_with_real_ip_header() {
        let mut request = Request::new(Body::empty());
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(client_ip(&request), "203.0.113.1");
    }

    #[test]
    fn test_get_client_ip_skips_garbage_forwarded_header() {
        let mut request = Request::new(Body::empty());
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));

        assert_eq!(client_ip(&request), "203.0.113.9");
    }

    #[test]
    fn test_get_client_ip_normalizes_ipv6() {
        let mut request = Request::new(Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("2001:0db8:0000:0000:0000:0000:0000:0001"),
        );

        assert_eq!(client_ip(&request), "2001:db8::1");
    }

    #[test]
    fn test_get_client_ip_from_connect_info() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 7], 40000))));

        assert_eq!(client_ip(&request), "198.51.100.7");
    }

    #[test]
    fn test_get_client_ip_fallback() {
        let request = Request::new(Body::empty());
        assert_eq!(client_ip(&request), "unknown");
    }
}
