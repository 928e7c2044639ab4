//! Redis-backed key-value store

use async_trait::async_trait;
use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};
use std::time::Duration;

use super::KvStore;
use crate::config::RedisConfig;
use crate::error::{sanitize_url, Error, Result};
use crate::retry::{with_backoff, RetryPolicy};

/// Redis [`KvStore`] backend on a deadpool connection pool.
///
/// TTLs are delegated to Redis (`SET ... EX`); `put_if_absent` maps to
/// `SET ... NX EX`, which is atomic on the server.
#[derive(Clone)]
pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    /// Connect with retry and exponential backoff
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let policy = RetryPolicy::new(
            config.max_retries.max(1),
            Duration::from_secs(config.retry_delay_secs),
            Duration::from_secs(config.retry_delay_secs * 8),
        );

        let pool = with_backoff(&policy, "redis connection", || try_create_pool(config)).await?;

        tracing::info!(
            "Redis connection pool created: url={} max_connections={}",
            sanitize_url(&config.url),
            config.max_connections
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Internal(format!("Failed to get Redis connection: {}", e)))
    }
}

async fn try_create_pool(config: &RedisConfig) -> Result<Pool> {
    let cfg = DeadpoolConfig::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| Error::Internal(format!("Failed to build Redis pool: {}", e)))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create Redis pool: {}", e)))?;

    // Test the connection
    let conn = pool
        .get()
        .await
        .map_err(|e| Error::Internal(format!("Failed to get Redis connection: {}", e)))?;
    drop(conn);

    Ok(pool)
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        use deadpool_redis::redis::AsyncCommands;

        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(Error::from)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        use deadpool_redis::redis::AsyncCommands;

        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;

        // SET key value NX EX ttl -- atomic insert-if-absent with expiry
        let outcome: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(Error::from)?;

        Ok(outcome.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        use deadpool_redis::redis::AsyncCommands;

        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await.map_err(Error::from)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        use deadpool_redis::redis::AsyncCommands;

        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(key).await.map_err(Error::from)?;
        Ok(exists)
    }
}
