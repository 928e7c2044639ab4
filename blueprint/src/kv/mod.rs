//! Key-value store abstraction
//!
//! An opaque key -> bytes mapping with per-entry TTL, shared by the session
//! store, the HMAC nonce store, and JWT revocation. Backends are pluggable;
//! callers never branch on the concrete store.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

mod memory;

#[cfg(feature = "cache")]
mod redis;

pub use memory::MemoryKvStore;

#[cfg(feature = "cache")]
pub use redis::RedisKvStore;

/// Opaque key -> bytes mapping with TTL
///
/// All operations are atomic per key. `put_if_absent` is the only compound
/// operation; backends must implement it without a read-modify-write race.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value for `key`, or `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` with the given TTL, replacing any prior value
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Store `value` only when `key` is absent; returns whether the insert
    /// happened
    async fn put_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether `key` is present and unexpired
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Drop expired entries; backends with native TTL enforcement need not
    /// override this
    async fn purge_expired(&self) -> Result<()> {
        Ok(())
    }
}
