use axum::{extract::Request, middleware::Next, response::Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

/// Logs each request with its outcome and latency
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = client_ip(&request);
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        warn!(
            target: "fixed_window_limiter::http",
            method = %method,
            path = %path,
            client_ip = %client_ip,
            status = status.as_u16(),
            latency_ms,
            "Request failed"
        );
    } else {
        info!(
            target: "fixed_window_limiter::http",
            method = %method,
            path = %path,
            client_ip = %client_ip,
            status = status.as_u16(),
            latency_ms,
            "Request completed"
        );
    }

    response
}

fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string());

    let real_ip = || {
        request
            .headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| {
            request
                .extensions()
                .get::<SocketAddr>()
                .map(|addr| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1, 10.0.0.1"));
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(client_ip(&request), "192.168.1.1");
    }

    #[test]
    fn test_client_ip_real_ip() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(client_ip(&request), "203.0.113.1");
    }

    #[test]
    fn test_client_ip_fallback() {
        let request = Request::new(axum::body::Body::empty());
        assert_eq!(client_ip(&request), "unknown");
    }
}
