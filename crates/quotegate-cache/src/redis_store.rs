//! Redis-backed store shared across instances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::store::{KeyType, KvStore, MemoryStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades to the in-process store without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// [`KvStore`] over a `deadpool-redis` connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Check that a connection can be obtained (for health checks).
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }
}

fn command_error(e: redis::RedisError) -> StoreError {
    StoreError::Command(e.to_string())
}

fn ttl_secs(ttl: Duration) -> u64 {
    // EX 0 is rejected by Redis
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(key).await.map_err(command_error)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .map_err(command_error)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        conn.exists::<_, bool>(key).await.map_err(command_error)
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, StoreError> {
        let mut conn = self.conn().await?;
        let raw: String = conn.key_type(key).await.map_err(command_error)?;
        Ok(KeyType::parse(&raw))
    }

    async fn rpush(&self, key: &str, values: &[Vec<u8>]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(key, values).await.map_err(command_error)
    }

    async fn lrange(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        conn.lrange::<_, Vec<Vec<u8>>>(key, 0, -1)
            .await
            .map_err(command_error)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await.map_err(command_error)
    }

    async fn replace_list(&self, key: &str, values: &[Vec<u8>], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !values.is_empty() {
            pipe.rpush(key, values)
                .ignore()
                .expire(key, ttl_secs(ttl) as i64)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await.map_err(command_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        conn.expire::<_, bool>(key, ttl_secs(ttl) as i64)
            .await
            .map_err(command_error)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn().await?;
        let secs: i64 = conn.ttl(key).await.map_err(command_error)?;
        // -2: missing key, -1: no expiry
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}

/// Create the cache store from configuration.
///
/// ## Store Modes
///
/// - **Redis disabled**: in-process [`MemoryStore`]
/// - **Redis enabled**: connects to Redis, falls back to [`MemoryStore`] on failure
///
/// The service starts and serves data even if Redis is unreachable.
pub async fn connect_store(config: &RedisConfig) -> Arc<dyn KvStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process cache store");
        return Arc::new(MemoryStore::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-process store."
            );
            return Arc::new(MemoryStore::new());
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Arc::new(RedisStore::new(pool))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-process store."
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_at_least_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(600)), 600);
    }

    #[tokio::test]
    async fn disabled_redis_uses_memory_store() {
        let store = connect_store(&RedisConfig::default()).await;
        assert_eq!(store.mode(), "memory");
    }

    #[tokio::test]
    async fn unreachable_redis_falls_back() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".into(),
            pool_size: 1,
            timeout_ms: 200,
        };
        let store = connect_store(&config).await;
        assert_eq!(store.mode(), "memory");
    }
}
