//! Cache manager: memoizes async operations with market-aware TTLs.
//!
//! ## Stampede protection
//!
//! Each key has its own async mutex, held from the store lookup until the
//! freshly produced value has been written. Concurrent callers for the same
//! key queue on that mutex; once the first caller has populated the store,
//! the others find a hit. Callers for different keys never contend.
//!
//! Cancelling a queued caller only drops its own wait. Cancelling the caller
//! that holds the lock drops its in-progress computation and releases the
//! lock; the next queued caller re-reads the store and computes itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use quotegate_core::MarketClock;

use crate::codec::{CacheRecord, Cacheable, CodecError};
use crate::key::CacheKey;
use crate::store::{KeyType, KvStore, StoreError};

/// Freshness for one cached operation.
///
/// `base` applies while the market is open, `closed` otherwise. The choice is
/// made once, when the value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    pub base: Duration,
    pub closed: Duration,
}

impl TtlPolicy {
    pub fn new(base: Duration, closed: Duration) -> Self {
        Self { base, closed }
    }

    pub fn from_secs(base: u64, closed: u64) -> Self {
        Self::new(Duration::from_secs(base), Duration::from_secs(closed))
    }

    pub fn select(&self, market_open: bool) -> Duration {
        if market_open { self.base } else { self.closed }
    }
}

type KeyLocks = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive hold on one cache key; removes its lock entry when no other
/// task is waiting.
struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct CacheManager {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn MarketClock>,
    prefix: String,
    locks: KeyLocks,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn MarketClock>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Round-trip to the store under this manager's key prefix.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let key = format!("{}:health", self.prefix);
        self.store.exists(&key).await.map(|_| ())
    }

    /// Number of keys currently locked or waited on.
    pub fn pending_keys(&self) -> usize {
        self.locks.len()
    }

    pub fn key_for<A>(&self, operation: &str, args: &A) -> Result<CacheKey, CodecError>
    where
        A: Serialize + ?Sized,
    {
        CacheKey::derive(&self.prefix, operation, args)
    }

    /// Return the cached result for `(operation, args)` or produce, store and
    /// return it.
    ///
    /// Producer errors are returned as-is and never cached. A value that
    /// cannot be encoded is reported as an error even though it was produced.
    /// Store failures are logged and otherwise ignored.
    pub async fn cached<A, T, E, F, Fut>(
        &self,
        operation: &str,
        args: &A,
        ttl: TtlPolicy,
        produce: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Cacheable,
        E: From<CodecError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key_for(operation, args)?;
        let _guard = self.lock(&key).await;

        if let Some(hit) = self.lookup::<T>(&key).await {
            tracing::debug!(operation, key = %key, "cache hit");
            return Ok(hit);
        }
        tracing::debug!(operation, key = %key, "cache miss");

        let value = produce().await?;
        let record = value.encode()?;

        let market_open = self.clock.is_open();
        let ttl = ttl.select(market_open);
        match self.write(&key, record, ttl).await {
            Ok(()) => tracing::debug!(
                operation,
                key = %key,
                market_open,
                ttl_secs = ttl.as_secs(),
                "cache set"
            ),
            Err(e) => tracing::warn!(operation, key = %key, error = %e, "cache write failed"),
        }

        Ok(value)
    }

    async fn lock(&self, key: &CacheKey) -> KeyGuard<'_> {
        let lock = Arc::clone(self.locks.entry(key.as_str().to_string()).or_default().value());
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: &self.locks,
            key: key.as_str().to_string(),
            guard: Some(guard),
        }
    }

    async fn lookup<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        let record = match self.read(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, bypassing cache");
                return None;
            }
        };
        match T::decode(record) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StoreError> {
        let key = key.as_str();
        if !self.store.exists(key).await? {
            return Ok(None);
        }
        match self.store.key_type(key).await? {
            KeyType::String => Ok(self.store.get(key).await?.map(CacheRecord::Scalar)),
            KeyType::List => {
                let items = self.store.lrange(key).await?;
                Ok((!items.is_empty()).then_some(CacheRecord::List(items)))
            }
            KeyType::None => Ok(None),
            KeyType::Other(kind) => Err(StoreError::WrongType(format!("{key} holds a {kind}"))),
        }
    }

    async fn write(&self, key: &CacheKey, record: CacheRecord, ttl: Duration) -> Result<(), StoreError> {
        let key = key.as_str();
        match record {
            CacheRecord::Scalar(bytes) => self.store.set_ex(key, &bytes, ttl).await,
            CacheRecord::List(items) => {
                if items.is_empty() {
                    tracing::debug!(key, "empty list result not cached");
                    return Ok(());
                }
                self.store.replace_list(key, &items, ttl).await
            }
        }
    }
}
