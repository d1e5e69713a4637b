//! Request rate limiting and security response headers.
//!
//! The limiter counts requests per client IP and path in fixed windows kept
//! in the cache's remote tier, so every instance sharing a Redis shares the
//! budget. A counter failure lets the request through.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::AppState;
use crate::config::Config;
use crate::error::AppError;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; \
     style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; \
     connect-src 'self' wss: https:; frame-ancestors 'none'";

/// First `X-Forwarded-For` hop, else the socket peer.
fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u64, remaining: u64) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
}

pub async fn rate_limit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let limits = &state.config.security;
    if limits.rate_limit_requests == 0 {
        return next.run(request).await;
    }

    let key = format!("ratelimit:{}:{}", client_ip(&request), request.uri().path());
    let window = Duration::from_secs(limits.rate_limit_window_secs.max(1));
    let count = match state.cache.incr_counter(&key, window).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(key, error = %e, "Rate limit counter unavailable");
            return next.run(request).await;
        }
    };

    if count > limits.rate_limit_requests {
        tracing::warn!(key, count, "Rate limit exceeded");
        let mut response = AppError::RateLimited("Too many requests".to_string()).into_response();
        set_limit_headers(response.headers_mut(), limits.rate_limit_requests, 0);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(window.as_secs()));
        return response;
    }

    let mut response = next.run(request).await;
    set_limit_headers(
        response.headers_mut(),
        limits.rate_limit_requests,
        limits.rate_limit_requests - count,
    );
    response
}

/// Header layers stamped on every response. HSTS is added in production.
pub fn security_headers(config: &Config) -> Vec<SetResponseHeaderLayer<HeaderValue>> {
    let mut headers = vec![
        (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
        (header::REFERRER_POLICY, HeaderValue::from_static("strict-origin-when-cross-origin")),
        (
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("geolocation=(self), microphone=()"),
        ),
        (header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(CONTENT_SECURITY_POLICY)),
    ];
    if config.is_production() {
        let hsts = format!(
            "max-age={}; includeSubDomains; preload",
            config.security.hsts_max_age_secs
        );
        match HeaderValue::try_from(hsts) {
            Ok(value) => headers.push((header::STRICT_TRANSPORT_SECURITY, value)),
            Err(e) => tracing::warn!(error = %e, "Invalid HSTS header value"),
        }
    }
    headers
        .into_iter()
        .map(|(name, value)| SetResponseHeaderLayer::if_not_present(name, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn request_with(forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/health");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        builder.body(axum::body::Body::empty()).unwrap()
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        assert_eq!(client_ip(&request_with(Some("203.0.113.7, 10.0.0.1"))), "203.0.113.7");
        assert_eq!(client_ip(&request_with(None)), "unknown");

        let mut request = request_with(None);
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 4], 5000))));
        assert_eq!(client_ip(&request), "192.0.2.4");
    }

    #[test]
    fn hsts_only_in_production() {
        let mut config = Config::default();
        assert_eq!(security_headers(&config).len(), 6);
        config.server.environment = Environment::Production;
        assert_eq!(security_headers(&config).len(), 7);
    }
}
