//! Middleware for request context, logging, authentication, and security

pub mod auth;
pub mod context;
pub mod csrf;
pub mod rate_limit;
pub mod request_logger;
pub mod security_headers;

pub use auth::{
    auth_middleware, AuthProvider, AuthenticatedUser, Authenticator, BasicAuth, HmacAuth,
    JwtAuth, SessionIdentityAuth, TokenAuth, TokenListAuth,
};
pub use context::{client_ip, RequestContext};
pub use csrf::{CsrfProtect, CsrfToken};
pub use rate_limit::RateLimit;
pub use request_logger::{RequestLogger, REQUEST_ID_HEADER, TRACE_ID_HEADER};
pub use security_headers::{CspNonce, SecurityHeaders};
