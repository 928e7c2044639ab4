//! # blueprint
//!
//! Application framework for building secure HTTP services and microservices
//! that talk to message brokers, key-value coordinators, and relational
//! stores. It bundles the systems primitives every such service re-invents:
//! a request-scoped middleware pipeline with pluggable authentication, a
//! session manager with pluggable storage and identity, a Kafka
//! consumer/producer with correct shutdown semantics, and two-stage request
//! validation with recursive user rules.
//!
//! ## Features
//!
//! - **Middleware pipeline**: request logging/ids, security headers, per-IP
//!   rate limiting, session attach, CSRF gate, auth providers
//! - **Auth providers**: static token, token list, basic, JWT bearer, HMAC
//!   signed requests, session identity
//! - **Sessions**: lazy creation, regeneration, flash data, typed identity,
//!   memory/redis/KV stores
//! - **HMAC**: signed-request verification with nonce replay protection
//! - **JWT**: issue, parse, refresh, revoke
//! - **Kafka**: consumer lifecycle with safe teardown, async producer,
//!   topic admin (feature `kafka`)
//! - **Validation**: declarative binding rules plus a recursive user-rule
//!   walk with field-path error reporting
//! - **Graceful shutdown**: SIGTERM/SIGINT handling, in-flight drain, TLS
//!
//! ## Example
//!
//! ```rust,no_run
//! use blueprint::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let sessions = SessionManager::in_memory(config.session.clone());
//!     let auth = Arc::new(TokenAuth::new(
//!         config.server.auth_token_header().to_string(),
//!         config.server.auth_token_secret().to_string(),
//!     ));
//!
//!     let app = Router::new()
//!         .route("/health", get(health))
//!         .route("/ready", get(readiness));
//!
//!     Server::new(config)
//!         .with_session(sessions)
//!         .with_rate_limit()
//!         .with_auth(auth)
//!         .serve(app)
//!         .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod hmac;
pub mod jwt;
pub mod kv;
pub mod middleware;
pub mod observability;
pub mod pin;
pub mod responses;
pub mod retry;
pub mod secret;
pub mod server;
pub mod session;
pub mod sync;
pub mod validate;

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "tls")]
pub mod tls;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        Config, HmacConfig, IsolationLevel, JwtConfig, KafkaAuthType, RateLimitConfig,
        SecurityHeadersConfig, SessionConfig, StartOffset,
    };

    pub use crate::error::{Error, Result};
    pub use crate::health::{health, readiness};
    pub use crate::observability::init_tracing;
    pub use crate::responses::{
        http_400, http_401, http_403, http_404, http_429, http_500, ErrorEnvelope, RequestError,
        Success,
    };
    pub use crate::server::Server;

    pub use crate::middleware::{
        auth_middleware, AuthProvider, AuthenticatedUser, Authenticator, BasicAuth, CspNonce,
        CsrfProtect, CsrfToken, HmacAuth, JwtAuth, RateLimit, RequestContext, RequestLogger,
        SecurityHeaders, SessionIdentityAuth, TokenAuth, TokenListAuth,
    };

    pub use crate::session::{
        session_middleware, Session, SessionIdentity, SessionManager, SessionRecord, SessionStore,
    };

    pub use crate::hmac::{HmacKey, HmacProvider, HmacSignature, KeyProvider, SingleKeyProvider};
    pub use crate::jwt::{Claims, JwtProvider, JwtRevocation, MemoryJwtRevocation};
    pub use crate::kv::{KvStore, MemoryKvStore};
    pub use crate::pin::{
        compare_alphanumeric, compare_numeric, generate_alphanumeric, generate_numeric,
        generate_secure_base64_token,
    };
    pub use crate::secret::SecureCredential;
    pub use crate::validate::{
        CustomValidate, FieldError, RuleError, ValidateDeep, ValidatedJson, ValidatedQuery,
    };

    #[cfg(feature = "cache")]
    pub use crate::kv::RedisKvStore;

    #[cfg(feature = "cache")]
    pub use crate::session::RedisSessionStore;

    #[cfg(feature = "kafka")]
    pub use crate::kafka::{Admin, Consumer, Producer};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, instrument, trace, warn};

    // Re-export tokio for async runtime
    pub use tokio;

    // Re-export async-trait for async trait definitions
    pub use async_trait::async_trait;

    // Re-export cancellation for shutdown plumbing
    pub use tokio_util::sync::CancellationToken;

    // Re-export time utilities
    pub use chrono::{DateTime, Utc};

    // Re-export UUID
    pub use uuid::Uuid;
}
