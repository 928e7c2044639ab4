//! Per-request context

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use crate::error::Error;

/// Request-scoped scratchpad.
///
/// Created at request entry by the request-logger middleware and destroyed
/// with the request; never shared across requests. Clones share state within
/// the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Opaque request id, read from `X-Request-ID` or minted at entry
    pub request_id: String,

    /// Trace id, read from `X-Trace-ID` or minted at entry
    pub trace_id: String,

    /// Best-effort client IP (forwarding headers honored only from trusted
    /// proxies)
    pub client_ip: String,

    values: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl RequestContext {
    pub fn new(request_id: String, trace_id: String, client_ip: String) -> Self {
        Self {
            request_id,
            trace_id,
            client_ip,
            values: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store an arbitrary user value on the request
    pub fn set_value(&self, key: &str, value: serde_json::Value) {
        self.values
            .write()
            .expect("context lock poisoned")
            .insert(key.to_string(), value);
    }

    /// Read a user value back
    pub fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .read()
            .expect("context lock poisoned")
            .get(key)
            .cloned()
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or_else(|| {
            Error::Internal("request logger middleware is not installed".to_string())
        })
    }
}

/// Resolve the client IP for a request.
///
/// The socket peer address wins unless it belongs to a trusted proxy, in
/// which case the first `X-Forwarded-For` entry (the original client) is
/// used. Without peer information (e.g. in tests) the forwarding headers are
/// consulted directly.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[String],
) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match peer {
        Some(addr) => {
            let peer_ip = addr.ip().to_string();
            let trusted = trusted_proxies.iter().any(|p| p == &peer_ip);
            if trusted {
                forwarded.unwrap_or(peer_ip)
            } else {
                peer_ip
            }
        }
        None => forwarded.unwrap_or_else(|| "unknown".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_xff(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_values_round_trip() {
        let ctx = RequestContext::new("r1".into(), "t1".into(), "1.2.3.4".into());
        ctx.set_value("tenant", serde_json::json!("acme"));
        assert_eq!(ctx.get_value("tenant").unwrap(), serde_json::json!("acme"));
        assert!(ctx.get_value("missing").is_none());
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarding() {
        let headers = headers_with_xff("10.0.0.9");
        let peer = "203.0.113.7:4444".parse().ok();
        assert_eq!(client_ip(&headers, peer, &[]), "203.0.113.7");
    }

    #[test]
    fn test_trusted_proxy_uses_first_forwarded_entry() {
        let headers = headers_with_xff("198.51.100.2, 10.0.0.1");
        let peer = "10.0.0.1:4444".parse().ok();
        let trusted = vec!["10.0.0.1".to_string()];
        assert_eq!(client_ip(&headers, peer, &trusted), "198.51.100.2");
    }

    #[test]
    fn test_no_peer_falls_back_to_headers() {
        let headers = headers_with_xff("198.51.100.2");
        assert_eq!(client_ip(&headers, None, &[]), "198.51.100.2");
        assert_eq!(client_ip(&HeaderMap::new(), None, &[]), "unknown");
    }
}
