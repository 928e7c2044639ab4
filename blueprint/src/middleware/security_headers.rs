//! Security response headers
//!
//! Applies the configured security headers to every response. HSTS is only
//! sent when the server terminates TLS; HSTS over plain HTTP is meaningless
//! and potentially confusing. A Content-Security-Policy template may carry
//! `{nonce}`, replaced per request with a CSPRNG nonce that handlers can
//! read back through the [`CspNonce`] extension for inline scripts.

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::config::SecurityHeadersConfig;
use crate::pin::generate_secure_base64_token;

const CSP_NONCE_BYTES: usize = 16;

/// Per-request CSP nonce, present when the policy template uses `{nonce}`
#[derive(Debug, Clone)]
pub struct CspNonce(pub String);

/// Security headers middleware state
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    config: SecurityHeadersConfig,
    tls_enabled: bool,
}

impl SecurityHeaders {
    pub fn new(config: SecurityHeadersConfig, tls_enabled: bool) -> Self {
        Self {
            config,
            tls_enabled,
        }
    }

    /// Middleware function; install with `from_fn_with_state`
    pub async fn middleware(
        State(headers): State<SecurityHeaders>,
        mut request: Request,
        next: Next,
    ) -> Response {
        let config = &headers.config;
        if !config.enabled {
            return next.run(request).await;
        }

        // Mint the CSP nonce up front so handlers can interpolate it
        let csp = config.content_security_policy.clone().map(|template| {
            if template.contains("{nonce}") {
                let nonce = generate_secure_base64_token(CSP_NONCE_BYTES)
                    .unwrap_or_default();
                let policy = template.replace("{nonce}", &nonce);
                request.extensions_mut().insert(CspNonce(nonce));
                policy
            } else {
                template
            }
        });

        let mut response = next.run(request).await;

        if headers.tls_enabled && config.hsts {
            let mut value = format!("max-age={}", config.hsts_max_age_secs);
            if config.hsts_include_subdomains {
                value.push_str("; includeSubDomains");
            }
            if config.hsts_preload {
                value.push_str("; preload");
            }
            set_if_absent(&mut response, header::STRICT_TRANSPORT_SECURITY, &value);
        }

        if config.x_content_type_options {
            set_if_absent(&mut response, header::X_CONTENT_TYPE_OPTIONS, "nosniff");
        }

        if !config.x_xss_protection.is_empty() {
            set_if_absent(
                &mut response,
                header::X_XSS_PROTECTION,
                &config.x_xss_protection,
            );
        }

        if !config.x_frame_options.is_empty() {
            set_if_absent(&mut response, header::X_FRAME_OPTIONS, &config.x_frame_options);
        }

        if !config.referrer_policy.is_empty() {
            set_if_absent(&mut response, header::REFERRER_POLICY, &config.referrer_policy);
        }

        if let Some(ref policy) = config.feature_policy {
            set_if_absent(
                &mut response,
                HeaderName::from_static("feature-policy"),
                policy,
            );
        }

        if let Some(ref policy) = config.permissions_policy {
            set_if_absent(
                &mut response,
                HeaderName::from_static("permissions-policy"),
                policy,
            );
        }

        if let Some(ref policy) = csp {
            set_if_absent(&mut response, header::CONTENT_SECURITY_POLICY, policy);
        }

        if config.no_store {
            set_if_absent(&mut response, header::CACHE_CONTROL, "no-store");
            set_if_absent(&mut response, header::PRAGMA, "no-cache");
            set_if_absent(&mut response, header::EXPIRES, "0");
        }

        response
    }
}

fn set_if_absent(response: &mut Response, name: HeaderName, value: &str) {
    if response.headers().contains_key(&name) {
        return;
    }
    if let Ok(header_value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, header_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn app(config: SecurityHeadersConfig, tls: bool) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(
                SecurityHeaders::new(config, tls),
                SecurityHeaders::middleware,
            ))
    }

    fn request() -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_headers() {
        let response = app(SecurityHeadersConfig::default(), false)
            .oneshot(request())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
        assert_eq!(
            headers.get("referrer-policy").unwrap(),
            "strict-origin-when-cross-origin"
        );
        // No HSTS without TLS
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn test_hsts_only_under_tls() {
        let response = app(SecurityHeadersConfig::default(), true)
            .oneshot(request())
            .await
            .unwrap();
        let hsts = response
            .headers()
            .get("strict-transport-security")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(hsts.starts_with("max-age=31536000"));
        assert!(hsts.contains("includeSubDomains"));
    }

    #[tokio::test]
    async fn test_csp_nonce_substitution() {
        let config = SecurityHeadersConfig {
            content_security_policy: Some(
                "script-src 'self' 'nonce-{nonce}'".to_string(),
            ),
            ..SecurityHeadersConfig::default()
        };

        // The handler reads the nonce from the request extension; the header
        // must carry the same value.
        let app = Router::new()
            .route(
                "/",
                get(|nonce: axum::Extension<CspNonce>| async move { nonce.0 .0.clone() }),
            )
            .layer(from_fn_with_state(
                SecurityHeaders::new(config, false),
                SecurityHeaders::middleware,
            ));

        let response = app.oneshot(request()).await.unwrap();
        let csp = response
            .headers()
            .get("content-security-policy")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let nonce = String::from_utf8_lossy(&body);

        assert!(!nonce.is_empty());
        assert!(csp.contains(&format!("'nonce-{}'", nonce)));
    }

    #[tokio::test]
    async fn test_no_store_headers() {
        let config = SecurityHeadersConfig {
            no_store: true,
            ..SecurityHeadersConfig::default()
        };
        let response = app(config, false).oneshot(request()).await.unwrap();
        let headers = response.headers();
        assert_eq!(headers.get("cache-control").unwrap(), "no-store");
        assert_eq!(headers.get("pragma").unwrap(), "no-cache");
        assert_eq!(headers.get("expires").unwrap(), "0");
    }

    #[tokio::test]
    async fn test_disabled_sets_nothing() {
        let config = SecurityHeadersConfig {
            enabled: false,
            ..SecurityHeadersConfig::default()
        };
        let response = app(config, true).oneshot(request()).await.unwrap();
        assert!(response.headers().get("x-content-type-options").is_none());
    }
}
