//! Nonce replay protection

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::kv::{KvStore, MemoryKvStore};

#[cfg(feature = "cache")]
use crate::kv::RedisKvStore;

/// Bounded set of seen nonces with per-entry TTL.
///
/// `put_if_absent` must be atomic: exactly one caller wins for a given nonce
/// within its TTL. Implementations may evict under memory pressure, but only
/// oldest-first once capacity is exhausted, so replays inside the key
/// interval are always caught.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Record `nonce` with the given TTL; returns false when it was already
    /// present (replay)
    async fn put_if_absent(&self, nonce: &str, ttl: Duration) -> Result<bool>;
}

/// Nonce store over any [`KvStore`] backend
pub struct KvNonceStore<S> {
    store: S,
    prefix: String,
}

impl<S: KvStore> KvNonceStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            prefix: "hmac:nonce:".to_string(),
        }
    }

    fn nonce_key(&self, nonce: &str) -> String {
        format!("{}{}", self.prefix, nonce)
    }
}

#[async_trait]
impl<S: KvStore> NonceStore for KvNonceStore<S> {
    async fn put_if_absent(&self, nonce: &str, ttl: Duration) -> Result<bool> {
        self.store
            .put_if_absent(&self.nonce_key(nonce), b"1", ttl)
            .await
    }
}

/// In-memory nonce store (default)
pub type MemoryNonceStore = KvNonceStore<MemoryKvStore>;

impl MemoryNonceStore {
    /// Create a memory-backed store bounded to `capacity` nonces
    pub fn bounded(capacity: usize) -> Self {
        Self::new(MemoryKvStore::new(capacity))
    }
}

/// Redis-backed nonce store for multi-instance deployments
#[cfg(feature = "cache")]
pub type RedisNonceStore = KvNonceStore<RedisKvStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_insert_wins() {
        let store = MemoryNonceStore::bounded(16);
        let ttl = Duration::from_secs(600);

        assert!(store.put_if_absent("nonce-1", ttl).await.unwrap());
        assert!(!store.put_if_absent("nonce-1", ttl).await.unwrap());
        assert!(store.put_if_absent("nonce-2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_nonce_reusable_after_ttl() {
        let store = MemoryNonceStore::bounded(16);
        assert!(store
            .put_if_absent("n", Duration::from_millis(0))
            .await
            .unwrap());
        assert!(store
            .put_if_absent("n", Duration::from_secs(600))
            .await
            .unwrap());
    }
}
