//! Session persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::identity::StoredIdentity;
use crate::error::{Error, Result};
use crate::kv::{KvStore, MemoryKvStore};

#[cfg(feature = "cache")]
use crate::kv::RedisKvStore;

/// Persisted session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session id (32 CSPRNG bytes, URL-safe base64)
    pub id: String,

    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Arbitrary key -> value payload
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,

    /// Authenticated identity, if any
    #[serde(default)]
    pub identity: Option<StoredIdentity>,

    /// One-shot values consumed on read
    #[serde(default)]
    pub flash: HashMap<String, serde_json::Value>,
}

/// Session persistence contract, keyed by session id.
///
/// The manager never branches on the backend; anything satisfying
/// {get, set-with-ttl, delete, exists} plugs in.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Drop expired records, for backends without native TTL enforcement
    async fn purge_expired(&self) -> Result<()> {
        Ok(())
    }
}

/// Session store over any [`KvStore`] backend; records are JSON-encoded
pub struct KvSessionStore<S> {
    store: S,
    prefix: String,
}

impl<S: KvStore> KvSessionStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            prefix: "session:".to_string(),
        }
    }

    fn session_key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }
}

#[async_trait]
impl<S: KvStore> SessionStore for KvSessionStore<S> {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let bytes = match self.store.get(&self.session_key(id)).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // Corrupt records are treated as absent; a fresh session is
                // synthesized upstream.
                tracing::warn!(session_id = %id, "dropping corrupt session record: {}", e);
                self.store.delete(&self.session_key(id)).await?;
                Ok(None)
            }
        }
    }

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| Error::Session(format!("failed to encode session: {}", e)))?;
        self.store.set(&self.session_key(&record.id), &bytes, ttl).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(&self.session_key(id)).await
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.store.exists(&self.session_key(id)).await
    }

    async fn purge_expired(&self) -> Result<()> {
        self.store.purge_expired().await
    }
}

/// In-memory session store (development and tests)
pub type MemorySessionStore = KvSessionStore<MemoryKvStore>;

impl MemorySessionStore {
    pub fn in_memory() -> Self {
        Self::new(MemoryKvStore::default())
    }
}

/// Redis-backed session store (production, distributed)
#[cfg(feature = "cache")]
pub type RedisSessionStore = KvSessionStore<RedisKvStore>;
