//! CSRF protection
//!
//! Mutating requests must present the token previously issued into the
//! session, either via the `X-CSRF-Token` header or the `_csrf` form field.
//! The expected value always comes from the session record itself, never
//! from a request-scoped value, so a forged request cannot supply its own
//! expectation. Comparison is constant time; mismatch yields 403.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, Method},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::pin::generate_secure_base64_token;
use crate::responses::http_403;
use crate::session::Session;

const CSRF_SESSION_KEY: &str = "_csrf_token";
const CSRF_HEADER: &str = "x-csrf-token";
const CSRF_FORM_FIELD: &str = "_csrf";
const CSRF_TOKEN_BYTES: usize = 32;

/// CSRF token bound to the current session.
///
/// Extracting it issues a token into the session on first use; hand the
/// value to templates or API clients for inclusion in mutating requests.
#[derive(Debug, Clone)]
pub struct CsrfToken(String);

impl CsrfToken {
    /// The raw token string
    pub fn token(&self) -> &str {
        &self.0
    }

    /// Read the session's token, issuing a fresh one when absent
    pub fn issue(session: &Session) -> Result<Self> {
        if let Some(existing) = session.get::<String>(CSRF_SESSION_KEY) {
            return Ok(Self(existing));
        }

        let token = generate_secure_base64_token(CSRF_TOKEN_BYTES)?;
        session.insert(CSRF_SESSION_KEY, &token)?;
        Ok(Self(token))
    }

    /// Replace the session's token.
    ///
    /// Call after login so a token fixated before authentication stops
    /// working.
    pub fn rotate(session: &Session) -> Result<Self> {
        let token = generate_secure_base64_token(CSRF_TOKEN_BYTES)?;
        session.insert(CSRF_SESSION_KEY, &token)?;
        Ok(Self(token))
    }
}

impl std::fmt::Display for CsrfToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let session = parts.extensions.get::<Session>().cloned().ok_or_else(|| {
            Error::Session("session middleware is not installed".to_string())
        })?;
        Self::issue(&session)
    }
}

/// CSRF gate configuration
#[derive(Debug, Clone)]
pub struct CsrfProtect {
    header_name: String,
    form_field: String,
}

impl Default for CsrfProtect {
    fn default() -> Self {
        Self {
            header_name: CSRF_HEADER.to_string(),
            form_field: CSRF_FORM_FIELD.to_string(),
        }
    }
}

impl CsrfProtect {
    pub fn new(header_name: impl Into<String>, form_field: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
            form_field: form_field.into(),
        }
    }

    /// Middleware function; install with `from_fn_with_state` after the
    /// session middleware
    pub async fn middleware(
        State(config): State<CsrfProtect>,
        mut request: Request,
        next: Next,
    ) -> Response {
        if matches!(
            *request.method(),
            Method::GET | Method::HEAD | Method::OPTIONS
        ) {
            return next.run(request).await;
        }

        let session = match request.extensions().get::<Session>().cloned() {
            Some(session) => session,
            None => {
                tracing::warn!("csrf check without a session");
                return http_403("CSRF validation failed");
            }
        };

        let expected: Option<String> = session.get(CSRF_SESSION_KEY);
        let expected = match expected {
            Some(token) => token,
            None => {
                tracing::warn!("csrf check with no token in session");
                return http_403("CSRF validation failed");
            }
        };

        let presented = match presented_token(&config, &mut request).await {
            Some(token) => token,
            None => {
                tracing::warn!("csrf token missing from request");
                return http_403("CSRF validation failed");
            }
        };

        let matches = expected.len() == presented.len()
            && bool::from(expected.as_bytes().ct_eq(presented.as_bytes()));
        if !matches {
            tracing::warn!("csrf token mismatch");
            return http_403("CSRF validation failed");
        }

        next.run(request).await
    }
}

/// Read the token from the header, falling back to the form field for
/// urlencoded bodies (the body is restored afterwards).
async fn presented_token(config: &CsrfProtect, request: &mut Request) -> Option<String> {
    if let Some(token) = request
        .headers()
        .get(&config.header_name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(token.to_string());
    }

    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if !is_form {
        return None;
    }

    let body = std::mem::replace(request.body_mut(), Body::empty());
    let bytes = axum::body::to_bytes(body, 1024 * 1024).await.ok()?;
    *request.body_mut() = Body::from(bytes.clone());

    let fields: HashMap<String, String> = serde_urlencoded::from_bytes(&bytes).ok()?;
    fields.get(&config.form_field).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::{session_middleware, SessionManager};
    use axum::http::StatusCode;
    use axum::{middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    async fn issue(csrf: CsrfToken) -> String {
        csrf.token().to_string()
    }

    async fn mutate() -> &'static str {
        "mutated"
    }

    fn app() -> Router {
        let manager = SessionManager::in_memory(SessionConfig {
            secure: false,
            ..SessionConfig::default()
        });

        Router::new()
            .route("/form", get(issue).post(mutate))
            .layer(from_fn_with_state(
                CsrfProtect::default(),
                CsrfProtect::middleware,
            ))
            .layer(from_fn_with_state(manager, session_middleware))
    }

    async fn obtain_token(app: &Router) -> (String, String) {
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/form")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        let token = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (cookie, String::from_utf8_lossy(&token).to_string())
    }

    #[tokio::test]
    async fn test_get_is_exempt() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/form")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_without_token_is_403() {
        let app = app();
        let (cookie, _token) = obtain_token(&app).await;

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/form")
                    .header("Cookie", cookie.as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_post_with_header_token_is_allowed() {
        let app = app();
        let (cookie, token) = obtain_token(&app).await;

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/form")
                    .header("Cookie", cookie.as_str())
                    .header("X-CSRF-Token", token.as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_with_form_field_token_is_allowed() {
        let app = app();
        let (cookie, token) = obtain_token(&app).await;

        let body = serde_urlencoded::to_string([("_csrf", token.as_str()), ("name", "x")]).unwrap();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/form")
                    .header("Cookie", cookie.as_str())
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_with_wrong_token_is_403() {
        let app = app();
        let (cookie, _token) = obtain_token(&app).await;

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/form")
                    .header("Cookie", cookie.as_str())
                    .header("X-CSRF-Token", "forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_rotate_invalidates_old_token() {
        let manager = SessionManager::in_memory(SessionConfig {
            secure: false,
            ..SessionConfig::default()
        });
        let session = manager.load_or_create(None).await.unwrap();

        let first = CsrfToken::issue(&session).unwrap();
        let second = CsrfToken::rotate(&session).unwrap();
        assert_ne!(first.token(), second.token());
        assert_eq!(
            session.get::<String>(CSRF_SESSION_KEY).unwrap(),
            second.token()
        );
    }
}
