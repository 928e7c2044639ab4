//! Pluggable authentication providers
//!
//! Every provider answers one question: may this request proceed? The shared
//! [`auth_middleware`] adapts any provider to the HTTP flow, emitting the 401
//! itself so providers never write responses. The single exception is the
//! `WWW-Authenticate` challenge, which basic auth supplies through
//! [`AuthProvider::challenge`].

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::context::RequestContext;
use crate::error::Result;
use crate::hmac::{HmacProvider, HmacRejection};
use crate::jwt::JwtProvider;
use crate::responses::ErrorEnvelope;
use crate::session::Session;

/// Access decision for one request.
///
/// Implementations may attach state (claims, username, key id) to the
/// request extensions before returning `true`. They must not write the
/// response; the middleware owns the 401.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn can_access(&self, request: &mut Request) -> bool;

    /// `WWW-Authenticate` value to send with a 401, if any
    fn challenge(&self) -> Option<HeaderValue> {
        None
    }
}

/// Adapt an [`AuthProvider`] to the middleware chain.
///
/// A denied request gets a 401 and the chain aborts; the body is the JSON
/// envelope only when the client asked for JSON.
pub async fn auth_middleware(
    State(provider): State<Arc<dyn AuthProvider>>,
    mut request: Request,
    next: Next,
) -> Response {
    let wants_json = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    if provider.can_access(&mut request).await {
        return next.run(request).await;
    }

    let mut response = if wants_json {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorEnvelope::new("Unauthorized")),
        )
            .into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    };

    if let Some(challenge) = provider.challenge() {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, challenge);
    }

    response
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

// ============================================================================
// Static token
// ============================================================================

/// Static token provider: the configured header must equal the configured
/// key. An empty key disables authentication entirely.
pub struct TokenAuth {
    header: String,
    key: String,
}

impl TokenAuth {
    pub fn new(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    async fn can_access(&self, request: &mut Request) -> bool {
        if self.key.is_empty() {
            return true;
        }

        request
            .headers()
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(|presented| constant_time_eq(presented.as_bytes(), self.key.as_bytes()))
            .unwrap_or(false)
    }
}

/// Token-list provider: the header must match any configured key. An empty
/// list disables authentication.
pub struct TokenListAuth {
    header: String,
    keys: Vec<String>,
}

impl TokenListAuth {
    pub fn new(header: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            header: header.into(),
            keys,
        }
    }
}

#[async_trait]
impl AuthProvider for TokenListAuth {
    async fn can_access(&self, request: &mut Request) -> bool {
        if self.keys.is_empty() {
            return true;
        }

        let presented = match request.headers().get(&self.header).and_then(|v| v.to_str().ok()) {
            Some(v) => v,
            None => return false,
        };

        // Check every key so timing does not reveal which one matched
        let mut matched = false;
        for key in &self.keys {
            matched |= constant_time_eq(presented.as_bytes(), key.as_bytes());
        }
        matched
    }
}

// ============================================================================
// Basic auth
// ============================================================================

/// Username attached to the request by basic auth on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Credential backend consulted by [`BasicAuth`]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<bool>;
}

/// HTTP basic authentication against a pluggable backend.
///
/// Credentials with an empty username or password are rejected without
/// consulting the backend.
pub struct BasicAuth {
    backend: Arc<dyn Authenticator>,
    realm: String,
}

impl BasicAuth {
    pub fn new(backend: Arc<dyn Authenticator>, realm: impl Into<String>) -> Self {
        Self {
            backend,
            realm: realm.into(),
        }
    }

    fn decode_credentials(request: &Request) -> Option<(String, String)> {
        let value = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = BASE64_STANDARD.decode(encoded).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }
}

#[async_trait]
impl AuthProvider for BasicAuth {
    async fn can_access(&self, request: &mut Request) -> bool {
        let (username, password) = match Self::decode_credentials(request) {
            Some(credentials) => credentials,
            None => return false,
        };

        if username.is_empty() || password.is_empty() {
            return false;
        }

        match self.backend.authenticate(&username, &password).await {
            Ok(true) => {
                request
                    .extensions_mut()
                    .insert(AuthenticatedUser(username));
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("basic auth backend error: {}", e);
                false
            }
        }
    }

    fn challenge(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!("Basic realm=\"{}\"", self.realm)).ok()
    }
}

// ============================================================================
// JWT bearer
// ============================================================================

/// Bearer-token provider over the [`JwtProvider`]; attaches
/// [`crate::jwt::Claims`] on success.
pub struct JwtAuth {
    provider: Arc<JwtProvider>,
}

impl JwtAuth {
    pub fn new(provider: Arc<JwtProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AuthProvider for JwtAuth {
    async fn can_access(&self, request: &mut Request) -> bool {
        let token = match request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            Some(token) => token.to_string(),
            None => return false,
        };

        match self.provider.parse_token(&token).await {
            Ok(claims) => {
                request.extensions_mut().insert(claims);
                true
            }
            Err(e) => {
                tracing::warn!("bearer token rejected: {}", e);
                false
            }
        }
    }
}

// ============================================================================
// HMAC signed requests
// ============================================================================

/// Signed-request provider over the [`HmacProvider`]; attaches
/// [`crate::hmac::VerifiedHmac`] on success.
///
/// The body is buffered (bounded by the configured maximum) and restored so
/// downstream handlers can re-read it.
pub struct HmacAuth {
    provider: Arc<HmacProvider>,
}

impl HmacAuth {
    pub fn new(provider: Arc<HmacProvider>) -> Self {
        Self { provider }
    }

    fn header(request: &Request, name: &str) -> String {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }
}

#[async_trait]
impl AuthProvider for HmacAuth {
    async fn can_access(&self, request: &mut Request) -> bool {
        let config = self.provider.config();
        let hash = Self::header(request, &config.hash_header);
        let timestamp = Self::header(request, &config.timestamp_header);
        let nonce = Self::header(request, &config.nonce_header);

        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let client_ip = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.client_ip.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let max_input = config.max_input_bytes;
        let body = std::mem::replace(request.body_mut(), Body::empty());
        let bytes = match axum::body::to_bytes(body, max_input).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    client_ip = %client_ip,
                    "hmac body read failed: {}",
                    e
                );
                return false;
            }
        };

        // Restore the body for downstream handlers
        *request.body_mut() = Body::from(bytes.clone());

        let outcome = match self.provider.verify(&hash, &timestamp, &nonce, &bytes).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    method = %method,
                    path = %path,
                    client_ip = %client_ip,
                    "hmac verification error: {}",
                    e
                );
                return false;
            }
        };

        match outcome {
            Ok(verified) => {
                request.extensions_mut().insert(verified);
                true
            }
            Err(HmacRejection::MissingHeaders) => {
                tracing::info!(
                    method = %method,
                    path = %path,
                    client_ip = %client_ip,
                    "hmac headers missing"
                );
                false
            }
            Err(rejection) => {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    client_ip = %client_ip,
                    "hmac rejected: {}",
                    rejection
                );
                false
            }
        }
    }
}

// ============================================================================
// Session identity
// ============================================================================

/// Allows the request iff the attached session carries an identity
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionIdentityAuth;

#[async_trait]
impl AuthProvider for SessionIdentityAuth {
    async fn can_access(&self, request: &mut Request) -> bool {
        request
            .extensions()
            .get::<Session>()
            .map(|session| session.has_identity())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HmacConfig;
    use axum::{middleware::from_fn_with_state, routing::get, routing::post, Router};
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "ok"
    }

    fn protected(provider: Arc<dyn AuthProvider>) -> Router {
        Router::new()
            .route("/test", get(ok).post(ok))
            .layer(from_fn_with_state(provider, auth_middleware))
    }

    fn get_request(headers: &[(&str, &str)]) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_token_auth_allows_valid_key() {
        let app = protected(Arc::new(TokenAuth::new("X-API-Key", "valid-token")));
        let response = app
            .oneshot(get_request(&[("X-API-Key", "valid-token")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_token_auth_rejects_invalid_key() {
        let app = protected(Arc::new(TokenAuth::new("X-API-Key", "valid-token")));
        let response = app
            .oneshot(get_request(&[("X-API-Key", "invalid-token")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_key_disables_auth() {
        let app = protected(Arc::new(TokenAuth::new("X-API-Key", "")));
        let response = app.oneshot(get_request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_token_list() {
        let provider = Arc::new(TokenListAuth::new(
            "X-API-Key",
            vec!["a".to_string(), "b".to_string()],
        ));

        let response = protected(provider.clone())
            .oneshot(get_request(&[("X-API-Key", "b")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = protected(provider)
            .oneshot(get_request(&[("X-API-Key", "c")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_token_list_disables_auth() {
        let app = protected(Arc::new(TokenListAuth::new("X-API-Key", Vec::new())));
        let response = app.oneshot(get_request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_401_body_only_for_json_clients() {
        let app = protected(Arc::new(TokenAuth::new("X-API-Key", "secret")));
        let response = app
            .oneshot(get_request(&[("Accept", "application/json")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["success"], false);

        let app = protected(Arc::new(TokenAuth::new("X-API-Key", "secret")));
        let response = app
            .oneshot(get_request(&[("Accept", "text/html")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }

    struct FixedAuthenticator {
        username: &'static str,
        password: &'static str,
    }

    #[async_trait]
    impl Authenticator for FixedAuthenticator {
        async fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
            Ok(username == self.username && password == self.password)
        }
    }

    fn basic(provider_user: &'static str, password: &'static str) -> Arc<dyn AuthProvider> {
        Arc::new(BasicAuth::new(
            Arc::new(FixedAuthenticator {
                username: provider_user,
                password,
            }),
            "blueprint",
        ))
    }

    fn basic_header(user: &str, password: &str) -> String {
        format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{}:{}", user, password))
        )
    }

    #[tokio::test]
    async fn test_basic_auth_success_attaches_username() {
        let app = Router::new()
            .route(
                "/test",
                get(|user: axum::Extension<AuthenticatedUser>| async move { user.0 .0.clone() }),
            )
            .layer(from_fn_with_state(basic("alice", "pw"), auth_middleware));

        let response = app
            .oneshot(get_request(&[(
                "Authorization",
                &basic_header("alice", "pw"),
            )]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&body), "alice");
    }

    #[tokio::test]
    async fn test_basic_auth_challenge_on_failure() {
        let app = protected(basic("alice", "pw"));
        let response = app
            .oneshot(get_request(&[(
                "Authorization",
                &basic_header("alice", "wrong"),
            )]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"blueprint\""
        );
    }

    #[tokio::test]
    async fn test_basic_auth_empty_credentials_skip_backend() {
        struct PanickingAuthenticator;

        #[async_trait]
        impl Authenticator for PanickingAuthenticator {
            async fn authenticate(&self, _: &str, _: &str) -> Result<bool> {
                panic!("backend must not be consulted for empty credentials");
            }
        }

        let app = protected(Arc::new(BasicAuth::new(
            Arc::new(PanickingAuthenticator),
            "blueprint",
        )));
        let response = app
            .oneshot(get_request(&[(
                "Authorization",
                &basic_header("alice", ""),
            )]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_hmac_auth_round_trip() {
        let provider = Arc::new(
            HmacProvider::single_key(HmacConfig::default(), "primary", b"secret").unwrap(),
        );
        let auth = Arc::new(HmacAuth::new(provider.clone())) as Arc<dyn AuthProvider>;

        // Echo the body to prove it was restored after verification
        let app = Router::new()
            .route(
                "/test",
                post(|body: String| async move { body }),
            )
            .layer(from_fn_with_state(auth, auth_middleware));

        let body = br#"{"op":"transfer"}"#;
        let sig = provider.sign(body).unwrap();
        let config = provider.config();

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/test")
            .header(config.hash_header.as_str(), sig.hash.as_str())
            .header(config.timestamp_header.as_str(), sig.timestamp.as_str())
            .header(config.nonce_header.as_str(), sig.nonce.as_str())
            .body(Body::from(body.to_vec()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&echoed[..], body);
    }

    #[tokio::test]
    async fn test_hmac_auth_rejects_unsigned() {
        let provider = Arc::new(
            HmacProvider::single_key(HmacConfig::default(), "primary", b"secret").unwrap(),
        );
        let app = protected(Arc::new(HmacAuth::new(provider)));

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/test")
            .body(Body::from("payload"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_identity_auth() {
        use crate::config::SessionConfig;
        use crate::session::{session_middleware, SessionManager};

        let manager = SessionManager::in_memory(SessionConfig {
            secure: false,
            ..SessionConfig::default()
        });

        #[derive(serde::Serialize, serde::Deserialize)]
        struct User {
            id: u64,
        }
        impl crate::session::SessionIdentity for User {
            fn type_tag() -> &'static str {
                "user"
            }
        }

        // Login writes an identity; /test requires one
        let login_manager = manager.clone();
        let app = Router::new()
            .route(
                "/login",
                get(|session: Session| async move {
                    session.set_identity(&User { id: 1 }).unwrap();
                    "ok"
                }),
            )
            .route(
                "/test",
                get(ok).layer(from_fn_with_state(
                    Arc::new(SessionIdentityAuth) as Arc<dyn AuthProvider>,
                    auth_middleware,
                )),
            )
            .layer(from_fn_with_state(login_manager, session_middleware));

        // Anonymous request is denied
        let response = app
            .clone()
            .oneshot(get_request(&[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Log in, capture the cookie, retry
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/login")
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

        let response = app
            .oneshot(get_request(&[("Cookie", &cookie)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
