//! Bounded in-memory key-value store with TTL

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::KvStore;
use crate::error::Result;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    seq: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    // Insertion order, used for oldest-first eviction at capacity. Stale
    // items (seq mismatch after an overwrite) are skipped when popped.
    order: VecDeque<(u64, String)>,
    next_seq: u64,
}

/// In-memory [`KvStore`] backend.
///
/// Entries expire lazily on access. The store is bounded: when `capacity`
/// is reached, expired entries are dropped first, then the oldest live
/// entries are evicted until there is room.
pub struct MemoryKvStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl MemoryKvStore {
    /// Create a store bounded to `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("kv store lock poisoned");
        let now = Instant::now();
        inner
            .entries
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry
    pub fn sweep(&self) {
        let mut inner = self.inner.lock().expect("kv store lock poisoned");
        let now = Instant::now();
        inner.entries.retain(|_, e| e.expires_at > now);
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl Inner {
    fn insert(&mut self, key: String, value: Vec<u8>, ttl: Duration, capacity: usize) {
        let now = Instant::now();

        if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
            self.entries.retain(|_, e| e.expires_at > now);
            // Still full: evict oldest-first until there is room
            while self.entries.len() >= capacity {
                match self.order.pop_front() {
                    Some((seq, old_key)) => {
                        let live = self
                            .entries
                            .get(&old_key)
                            .map(|e| e.seq == seq)
                            .unwrap_or(false);
                        if live {
                            self.entries.remove(&old_key);
                        }
                    }
                    None => break,
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, key.clone()));
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                seq,
            },
        );
    }

    fn live_value(&self, key: &str) -> Option<&Entry> {
        self.entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().expect("kv store lock poisoned");
        Ok(inner.live_value(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock().expect("kv store lock poisoned");
        inner.insert(key.to_string(), value.to_vec(), ttl, self.capacity);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().expect("kv store lock poisoned");
        if inner.live_value(key).is_some() {
            return Ok(false);
        }
        inner.insert(key.to_string(), value.to_vec(), ttl, self.capacity);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("kv store lock poisoned");
        inner.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let inner = self.inner.lock().expect("kv store lock poisoned");
        Ok(inner.live_value(key).is_some())
    }

    async fn purge_expired(&self) -> Result<()> {
        self.sweep();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryKvStore::new(16);
        store.set("a", b"1", TTL).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert!(store.exists("a").await.unwrap());

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let store = MemoryKvStore::new(16);
        store
            .set("gone", b"x", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(store.get("gone").await.unwrap(), None);
        assert!(!store.exists("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_if_absent_is_atomic_per_key() {
        let store = MemoryKvStore::new(16);
        assert!(store.put_if_absent("n", b"1", TTL).await.unwrap());
        assert!(!store.put_if_absent("n", b"2", TTL).await.unwrap());
        assert_eq!(store.get("n").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_put_if_absent_succeeds_after_expiry() {
        let store = MemoryKvStore::new(16);
        assert!(store
            .put_if_absent("n", b"1", Duration::from_millis(0))
            .await
            .unwrap());
        assert!(store.put_if_absent("n", b"2", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_oldest_first_eviction_at_capacity() {
        let store = MemoryKvStore::new(3);
        store.set("a", b"1", TTL).await.unwrap();
        store.set("b", b"2", TTL).await.unwrap();
        store.set("c", b"3", TTL).await.unwrap();
        store.set("d", b"4", TTL).await.unwrap();

        // Oldest entry went first; the rest survive
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.exists("b").await.unwrap());
        assert!(store.exists("c").await.unwrap());
        assert!(store.exists("d").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_count_as_new_entry() {
        let store = MemoryKvStore::new(2);
        store.set("a", b"1", TTL).await.unwrap();
        store.set("b", b"2", TTL).await.unwrap();
        store.set("a", b"3", TTL).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"3".to_vec()));
        assert!(store.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_dropped_before_live_eviction() {
        let store = MemoryKvStore::new(2);
        store
            .set("stale", b"1", Duration::from_millis(0))
            .await
            .unwrap();
        store.set("live", b"2", TTL).await.unwrap();
        store.set("new", b"3", TTL).await.unwrap();

        // The expired entry made room; the live one was not evicted
        assert!(store.exists("live").await.unwrap());
        assert!(store.exists("new").await.unwrap());
    }
}
