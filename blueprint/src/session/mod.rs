//! HTTP session management
//!
//! Cookie-based sessions with pluggable storage backends. Sessions are
//! created lazily: a request without a valid session cookie gets a fresh
//! in-memory session that is only persisted once a handler writes to it.
//! Write-back is coalesced: an unmodified session is re-written only when
//! its last-access timestamp has drifted past half the idle timeout.
//!
//! # Lifecycle
//!
//! - Loaded from the store when the request carries a valid cookie
//! - Synthesized fresh when the cookie is missing, expired, or corrupt
//! - [`Session::regenerate`] swaps the id (values and identity survive) on
//!   privilege changes
//! - [`Session::clear`] destroys the session and starts an empty replacement
//! - [`Session::destroy`] ends the session and removes the cookie
//!
//! # Example
//!
//! ```rust,ignore
//! async fn login(session: Session, Json(creds): Json<LoginForm>) -> Result<Response> {
//!     let user = authenticate(&creds).await?;
//!     session.set_identity(&user)?;
//!     session.regenerate().await?;  // new id after privilege change
//!     Ok(Success::new("ok").into_response())
//! }
//! ```

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::pin::generate_secure_base64_token;

mod identity;
mod store;

pub use identity::{SessionIdentity, StoredIdentity};
pub use store::{KvSessionStore, MemorySessionStore, SessionRecord, SessionStore};

#[cfg(feature = "cache")]
pub use store::RedisSessionStore;

/// Bytes of entropy behind each session id (256 bits, URL-safe encoded)
const SESSION_ID_BYTES: usize = 32;

struct SessionState {
    record: SessionRecord,
    /// Whether the current id exists in the store
    persisted: bool,
    /// `last_accessed_at` as the store last saw it, for write coalescing
    persisted_last_access: Option<DateTime<Utc>>,
    dirty: bool,
    /// Cookie must be (re)issued with the current id
    rotated: bool,
    /// Cookie must be removed
    destroyed: bool,
}

/// Request-scoped session handle.
///
/// Cheap to clone; all clones share state. Obtained from request extensions
/// (the attach middleware inserts it) or via the extractor impl.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionShared>,
}

struct SessionShared {
    manager: SessionManager,
    state: RwLock<SessionState>,
}

impl Session {
    fn new(manager: SessionManager, state: SessionState) -> Self {
        Self {
            inner: Arc::new(SessionShared {
                manager,
                state: RwLock::new(state),
            }),
        }
    }

    /// Current session id
    pub fn id(&self) -> String {
        self.read(|s| s.record.id.clone())
    }

    /// Absolute expiry of the session
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.read(|s| s.record.expires_at)
    }

    /// Read a value from the session payload
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read(|s| {
            s.record
                .values
                .get(key)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
        })
    }

    /// Write a value into the session payload
    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let encoded = serde_json::to_value(value)
            .map_err(|e| Error::Session(format!("failed to encode session value: {}", e)))?;
        self.write(|s| {
            s.record.values.insert(key.to_string(), encoded);
            s.dirty = true;
        });
        Ok(())
    }

    /// Remove a value from the session payload
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.write(|s| {
            let removed = s.record.values.remove(key);
            if removed.is_some() {
                s.dirty = true;
            }
            removed
        })
    }

    /// Bind an identity to the session, marking it authenticated
    pub fn set_identity<T: SessionIdentity>(&self, identity: &T) -> Result<()> {
        let stored = StoredIdentity::encode(identity)?;
        self.write(|s| {
            s.record.identity = Some(stored);
            s.dirty = true;
        });
        Ok(())
    }

    /// Read the identity back as `T`; `None` when absent or of another type
    pub fn identity<T: SessionIdentity>(&self) -> Option<T> {
        self.read(|s| {
            s.record
                .identity
                .as_ref()
                .and_then(|stored| stored.decode().ok())
        })
    }

    /// Whether any identity is bound
    pub fn has_identity(&self) -> bool {
        self.read(|s| s.record.identity.is_some())
    }

    /// Unbind the identity
    pub fn clear_identity(&self) {
        self.write(|s| {
            if s.record.identity.take().is_some() {
                s.dirty = true;
            }
        });
    }

    /// Store a one-shot value, consumed by the next [`Session::take_flash`]
    pub fn set_flash<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let encoded = serde_json::to_value(value)
            .map_err(|e| Error::Session(format!("failed to encode flash value: {}", e)))?;
        self.write(|s| {
            s.record.flash.insert(key.to_string(), encoded);
            s.dirty = true;
        });
        Ok(())
    }

    /// Consume a one-shot value
    pub fn take_flash<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.write(|s| {
            let taken = s.record.flash.remove(key);
            if taken.is_some() {
                s.dirty = true;
            }
            taken.and_then(|v| serde_json::from_value(v).ok())
        })
    }

    /// Consume every one-shot value
    pub fn take_all_flash(&self) -> HashMap<String, serde_json::Value> {
        self.write(|s| {
            if s.record.flash.is_empty() {
                return HashMap::new();
            }
            s.dirty = true;
            std::mem::take(&mut s.record.flash)
        })
    }

    /// Swap the session id, keeping values and identity.
    ///
    /// Call on privilege changes (login, role elevation) to invalidate any
    /// fixated id. The old id stops resolving immediately.
    pub async fn regenerate(&self) -> Result<()> {
        let (mut record, old_id, was_persisted) = self.read(|s| {
            (s.record.clone(), s.record.id.clone(), s.persisted)
        });

        record.id = new_session_id()?;
        record.last_accessed_at = Utc::now();

        let manager = self.inner.manager.clone();
        manager
            .store()
            .set(&record, manager.record_ttl(&record))
            .await?;
        if was_persisted {
            manager.store().delete(&old_id).await?;
        }

        self.write(|s| {
            s.record = record;
            s.persisted = true;
            s.persisted_last_access = Some(s.record.last_accessed_at);
            s.dirty = false;
            s.rotated = true;
            s.destroyed = false;
        });
        Ok(())
    }

    /// Destroy the current session and start an empty replacement
    pub async fn clear(&self) -> Result<()> {
        let (old_id, was_persisted) = self.read(|s| (s.record.id.clone(), s.persisted));

        if was_persisted {
            self.inner.manager.store().delete(&old_id).await?;
        }

        let record = self.inner.manager.fresh_record()?;
        self.write(|s| {
            s.record = record;
            s.persisted = false;
            s.persisted_last_access = None;
            s.dirty = false;
            s.rotated = true;
            s.destroyed = false;
        });
        Ok(())
    }

    /// Destroy the session outright; the response removes the cookie
    pub async fn destroy(&self) -> Result<()> {
        let (old_id, was_persisted) = self.read(|s| (s.record.id.clone(), s.persisted));

        if was_persisted {
            self.inner.manager.store().delete(&old_id).await?;
        }

        self.write(|s| {
            s.dirty = false;
            s.rotated = false;
            s.destroyed = true;
        });
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.inner.state.read().expect("session lock poisoned");
        f(&state)
    }

    fn write<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.state.write().expect("session lock poisoned");
        f(&mut state)
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts.extensions.get::<Session>().cloned().ok_or_else(|| {
            Error::Session("session middleware is not installed".to_string())
        })
    }
}

struct ManagerInner {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Session manager: loads, attaches, and persists sessions around each
/// request
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                config,
                sweeper: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Manager over the in-memory store
    pub fn in_memory(config: SessionConfig) -> Self {
        Self::new(config, Arc::new(MemorySessionStore::in_memory()))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Start a background task evicting expired records every `interval`
    pub fn start_sweeper(&self, interval: Duration) {
        let store = Arc::clone(&self.inner.store);
        let shutdown = self.inner.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.purge_expired().await {
                            tracing::warn!("session sweep failed: {}", e);
                        }
                    }
                }
            }
        });

        let mut sweeper = self.inner.sweeper.lock().expect("sweeper lock poisoned");
        if let Some(old) = sweeper.replace(handle) {
            old.abort();
        }
    }

    /// Quiesce background cleanup
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = {
            let mut sweeper = self.inner.sweeper.lock().expect("sweeper lock poisoned");
            sweeper.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn fresh_record(&self) -> Result<SessionRecord> {
        let now = Utc::now();
        Ok(SessionRecord {
            id: new_session_id()?,
            created_at: now,
            last_accessed_at: now,
            expires_at: now
                + chrono::Duration::seconds(self.inner.config.expiration_secs as i64),
            values: HashMap::new(),
            identity: None,
            flash: HashMap::new(),
        })
    }

    fn fresh_session(&self) -> Result<Session> {
        Ok(Session::new(
            self.clone(),
            SessionState {
                record: self.fresh_record()?,
                persisted: false,
                persisted_last_access: None,
                dirty: false,
                rotated: false,
                destroyed: false,
            },
        ))
    }

    /// Store TTL for a record: the idle timeout, capped by the remaining
    /// absolute lifetime
    fn record_ttl(&self, record: &SessionRecord) -> Duration {
        let remaining = (record.expires_at - Utc::now()).num_seconds().max(1) as u64;
        Duration::from_secs(remaining.min(self.inner.config.idle_timeout_secs))
    }

    /// Load the session named by the cookie, or synthesize a fresh one when
    /// the cookie is missing, the record is absent/corrupt, or expiry has
    /// passed. An expired record is never surfaced to a handler.
    pub(crate) async fn load_or_create(&self, cookie_id: Option<&str>) -> Result<Session> {
        if let Some(id) = cookie_id {
            match self.store().get(id).await {
                Ok(Some(record)) => {
                    let now = Utc::now();
                    let idle_ok = (now - record.last_accessed_at).num_seconds()
                        <= self.inner.config.idle_timeout_secs as i64;
                    let absolute_ok = record.expires_at > now;

                    if idle_ok && absolute_ok {
                        let persisted_last_access = record.last_accessed_at;
                        let mut record = record;
                        record.last_accessed_at = now;

                        return Ok(Session::new(
                            self.clone(),
                            SessionState {
                                record,
                                persisted: true,
                                persisted_last_access: Some(persisted_last_access),
                                dirty: false,
                                rotated: false,
                                destroyed: false,
                            },
                        ));
                    }

                    self.store().delete(id).await?;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, "session load failed, starting fresh: {}", e);
                }
            }
        }

        self.fresh_session()
    }

    /// Persist the session if needed and produce the `Set-Cookie` header.
    ///
    /// Writes when the payload changed or the last-access timestamp drifted
    /// past half the idle timeout; a cookie is emitted whenever a write
    /// happened, the id rotated, or the session was destroyed.
    async fn finalize(&self, session: &Session) -> Result<Option<HeaderValue>> {
        let (destroyed, rotated, dirty, persisted, persisted_last_access, record) = session
            .read(|s| {
                (
                    s.destroyed,
                    s.rotated,
                    s.dirty,
                    s.persisted,
                    s.persisted_last_access,
                    s.record.clone(),
                )
            });

        if destroyed {
            return Ok(Some(self.removal_cookie()?));
        }

        let now = Utc::now();

        if record.expires_at <= now {
            // Absolute lifetime elapsed mid-request
            if persisted {
                self.store().delete(&record.id).await?;
            }
            return Ok(Some(self.removal_cookie()?));
        }

        let coalesce_threshold = (self.inner.config.idle_timeout_secs / 2) as i64;
        let access_drifted = persisted
            && persisted_last_access
                .map(|p| (now - p).num_seconds() >= coalesce_threshold)
                .unwrap_or(true);

        if dirty || access_drifted {
            let mut record = record;
            record.last_accessed_at = now;
            self.store().set(&record, self.record_ttl(&record)).await?;

            let id = record.id.clone();
            session.write(|s| {
                s.record.last_accessed_at = now;
                s.persisted = true;
                s.persisted_last_access = Some(now);
                s.dirty = false;
                s.rotated = false;
            });

            return Ok(Some(self.session_cookie(&id)?));
        }

        if rotated {
            session.write(|s| s.rotated = false);
            return Ok(Some(self.session_cookie(&record.id)?));
        }

        Ok(None)
    }

    fn same_site(&self) -> SameSite {
        match self.inner.config.same_site.to_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        }
    }

    fn session_cookie(&self, id: &str) -> Result<HeaderValue> {
        let config = &self.inner.config;
        let cookie = Cookie::build((config.cookie_name.clone(), id.to_string()))
            .path(config.path.clone())
            .http_only(config.http_only)
            .secure(config.secure)
            .same_site(self.same_site())
            .max_age(cookie::time::Duration::seconds(
                config.expiration_secs as i64,
            ))
            .build();

        HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| Error::Session(format!("invalid session cookie: {}", e)))
    }

    fn removal_cookie(&self) -> Result<HeaderValue> {
        let config = &self.inner.config;
        let mut cookie = Cookie::build((config.cookie_name.clone(), String::new()))
            .path(config.path.clone())
            .http_only(config.http_only)
            .secure(config.secure)
            .same_site(self.same_site())
            .build();
        cookie.make_removal();

        HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| Error::Session(format!("invalid session cookie: {}", e)))
    }
}

/// Attach a session to each request and persist it on the way out.
///
/// Install with `axum::middleware::from_fn_with_state(manager, session_middleware)`.
pub async fn session_middleware(
    State(manager): State<SessionManager>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_id = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| {
            Cookie::split_parse(raw.to_string())
                .filter_map(|c| c.ok())
                .find(|c| c.name() == manager.config().cookie_name)
                .map(|c| c.value().to_string())
        });

    let session = match manager.load_or_create(cookie_id.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("session attach failed: {}", e);
            return e.into_response();
        }
    };

    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    match manager.finalize(&session).await {
        Ok(Some(set_cookie)) => {
            response.headers_mut().append(header::SET_COOKIE, set_cookie);
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("session write-back failed: {}", e);
        }
    }

    response
}

fn new_session_id() -> Result<String> {
    generate_secure_base64_token(SESSION_ID_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, serde::Serialize, Deserialize)]
    struct UserIdentity {
        user_id: u64,
    }

    impl SessionIdentity for UserIdentity {
        fn type_tag() -> &'static str {
            "user"
        }
    }

    fn manager() -> SessionManager {
        SessionManager::in_memory(SessionConfig {
            secure: false,
            ..SessionConfig::default()
        })
    }

    #[tokio::test]
    async fn test_fresh_session_not_persisted_until_written() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        let id = session.id();

        // Untouched session produces no cookie and no store record
        assert!(manager.finalize(&session).await.unwrap().is_none());
        assert!(!manager.store().exists(&id).await.unwrap());

        session.insert("cart", vec![1, 2, 3]).unwrap();
        let cookie = manager.finalize(&session).await.unwrap();
        assert!(cookie.is_some());
        assert!(manager.store().exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_id_is_url_safe_256_bits() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        let id = session.id();
        assert_eq!(id.len(), 43); // ceil(4 * 32 / 3) without padding
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        session.insert("theme", "dark").unwrap();
        manager.finalize(&session).await.unwrap();

        let reloaded = manager
            .load_or_create(Some(&session.id()))
            .await
            .unwrap();
        assert_eq!(reloaded.id(), session.id());
        assert_eq!(reloaded.get::<String>("theme").unwrap(), "dark");
    }

    #[tokio::test]
    async fn test_unknown_cookie_gets_fresh_session() {
        let manager = manager();
        let session = manager.load_or_create(Some("bogus-id")).await.unwrap();
        assert_ne!(session.id(), "bogus-id");
    }

    #[tokio::test]
    async fn test_regenerate_preserves_payload_and_identity() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        session.insert("theme", "dark").unwrap();
        session.set_identity(&UserIdentity { user_id: 9 }).unwrap();
        manager.finalize(&session).await.unwrap();
        let old_id = session.id();

        session.regenerate().await.unwrap();
        let new_id = session.id();
        assert_ne!(old_id, new_id);

        // Old id no longer resolves
        assert!(manager.store().get(&old_id).await.unwrap().is_none());

        // New id resolves with equal values and identity
        let reloaded = manager.load_or_create(Some(&new_id)).await.unwrap();
        assert_eq!(reloaded.get::<String>("theme").unwrap(), "dark");
        assert_eq!(
            reloaded.identity::<UserIdentity>().unwrap(),
            UserIdentity { user_id: 9 }
        );
    }

    #[tokio::test]
    async fn test_clear_starts_empty_replacement() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        session.insert("k", "v").unwrap();
        manager.finalize(&session).await.unwrap();
        let old_id = session.id();

        session.clear().await.unwrap();
        assert_ne!(session.id(), old_id);
        assert!(session.get::<String>("k").is_none());
        assert!(manager.store().get(&old_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_emits_removal_cookie() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        session.insert("k", "v").unwrap();
        manager.finalize(&session).await.unwrap();

        session.destroy().await.unwrap();
        let cookie = manager.finalize(&session).await.unwrap().unwrap();
        let rendered = cookie.to_str().unwrap();
        assert!(rendered.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_flash_consumed_on_read() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        session.set_flash("notice", "saved!").unwrap();

        assert_eq!(
            session.take_flash::<String>("notice").unwrap(),
            "saved!"
        );
        assert!(session.take_flash::<String>("notice").is_none());
    }

    #[tokio::test]
    async fn test_identity_presence_check() {
        let manager = manager();
        let session = manager.load_or_create(None).await.unwrap();
        assert!(!session.has_identity());

        session.set_identity(&UserIdentity { user_id: 1 }).unwrap();
        assert!(session.has_identity());

        session.clear_identity();
        assert!(!session.has_identity());
    }

    #[tokio::test]
    async fn test_idle_expired_session_not_surfaced() {
        let manager = manager();
        let now = Utc::now();

        // Record last touched two idle-timeouts ago but still within its
        // absolute lifetime
        let record = SessionRecord {
            id: "idle-session".to_string(),
            created_at: now - chrono::Duration::hours(3),
            last_accessed_at: now - chrono::Duration::hours(2),
            expires_at: now + chrono::Duration::hours(12),
            values: HashMap::new(),
            identity: None,
            flash: HashMap::new(),
        };
        manager
            .store()
            .set(&record, Duration::from_secs(600))
            .await
            .unwrap();

        let session = manager.load_or_create(Some("idle-session")).await.unwrap();
        assert_ne!(session.id(), "idle-session");

        // The stale record was also evicted
        assert!(!manager.store().exists("idle-session").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweeper_shutdown_quiesces() {
        let manager = manager();
        manager.start_sweeper(Duration::from_millis(10));
        manager.shutdown().await;
    }

    #[test]
    fn test_cookie_attributes() {
        let manager = SessionManager::in_memory(SessionConfig::default());
        let cookie = manager.session_cookie("abc123").unwrap();
        let rendered = cookie.to_str().unwrap();
        assert!(rendered.starts_with("session_id=abc123"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("Max-Age=86400"));
    }
}
