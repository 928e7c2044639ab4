//! Request logging and id propagation
//!
//! The outermost pipeline middleware. On entry it reads or mints the request
//! and trace ids, resolves the client IP, and attaches the
//! [`RequestContext`]. On exit it logs one completion line whose level
//! follows the response status (INFO below 400, WARN for 4xx, ERROR for 5xx)
//! and echoes both ids onto the response.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

use super::context::{client_ip, RequestContext};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Request logger middleware state
#[derive(Debug, Clone, Default)]
pub struct RequestLogger {
    trusted_proxies: Vec<String>,
}

impl RequestLogger {
    pub fn new(trusted_proxies: Vec<String>) -> Self {
        Self { trusted_proxies }
    }

    /// Middleware function; install with `from_fn_with_state`
    pub async fn middleware(
        State(logger): State<RequestLogger>,
        mut request: Request,
        next: Next,
    ) -> Response {
        let request_id = header_or_mint(&request, REQUEST_ID_HEADER);
        let trace_id = header_or_mint(&request, TRACE_ID_HEADER);

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let ip = client_ip(request.headers(), peer, &logger.trusted_proxies);

        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let context = RequestContext::new(request_id.clone(), trace_id.clone(), ip.clone());
        request.extensions_mut().insert(context);

        let started = Instant::now();
        let mut response = next.run(request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = response.status();
        let bytes = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                trace_id = %trace_id,
                method = %method,
                path = %path,
                client_ip = %ip,
                user_agent = %user_agent,
                status = status.as_u16(),
                latency_ms,
                bytes,
                "request failed"
            );
        } else if status.is_client_error() {
            tracing::warn!(
                request_id = %request_id,
                trace_id = %trace_id,
                method = %method,
                path = %path,
                client_ip = %ip,
                user_agent = %user_agent,
                status = status.as_u16(),
                latency_ms,
                bytes,
                "request rejected"
            );
        } else {
            tracing::info!(
                request_id = %request_id,
                trace_id = %trace_id,
                method = %method,
                path = %path,
                client_ip = %ip,
                user_agent = %user_agent,
                status = status.as_u16(),
                latency_ms,
                bytes,
                "request completed"
            );
        }

        set_header(&mut response, REQUEST_ID_HEADER, &request_id);
        set_header(&mut response, TRACE_ID_HEADER, &trace_id);

        response
    }
}

fn header_or_mint(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn set_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(header_value) = HeaderValue::from_str(value) {
        response
            .headers_mut()
            .insert(header::HeaderName::from_static(name), header_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    async fn ctx_echo(ctx: RequestContext) -> String {
        ctx.request_id
    }

    fn app() -> Router {
        Router::new()
            .route("/echo", get(ctx_echo))
            .layer(from_fn_with_state(
                RequestLogger::default(),
                RequestLogger::middleware,
            ))
    }

    #[tokio::test]
    async fn test_ids_are_minted_and_echoed() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/echo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&request_id).is_ok());
        assert!(response.headers().contains_key(TRACE_ID_HEADER));

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&body), request_id);
    }

    #[tokio::test]
    async fn test_incoming_ids_are_preserved() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/echo")
                    .header(REQUEST_ID_HEADER, "req-abc")
                    .header(TRACE_ID_HEADER, "trace-xyz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "req-abc"
        );
        assert_eq!(
            response.headers().get(TRACE_ID_HEADER).unwrap(),
            "trace-xyz"
        );
    }
}
