//! Key-value store abstraction used by the cache manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection unavailable: {0}")]
    Unavailable(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),
}

/// Kind of value held at a key, as reported by `TYPE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    None,
    String,
    List,
    Other(String),
}

impl KeyType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "none" => Self::None,
            "string" => Self::String,
            "list" => Self::List,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The subset of Redis commands the cache relies on.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// `SET key value EX ttl`
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn key_type(&self, key: &str) -> Result<KeyType, StoreError>;

    async fn rpush(&self, key: &str, values: &[Vec<u8>]) -> Result<(), StoreError>;

    /// `LRANGE key 0 -1`
    async fn lrange(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Replace whatever `key` holds with `values` as a list expiring after
    /// `ttl`, applied as one unit. An empty `values` just deletes the key.
    async fn replace_list(&self, key: &str, values: &[Vec<u8>], ttl: Duration) -> Result<(), StoreError>;

    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining time to live; `None` for a missing key or one without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Short label for logs and health output.
    fn mode(&self) -> &'static str;
}

#[derive(Debug, Clone)]
enum MemoryValue {
    Scalar(Arc<Vec<u8>>),
    List(Vec<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: MemoryValue,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-instance store backed by a `DashMap`.
///
/// Expired entries are removed when next touched.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entry for `key`, evicting it first if expired.
    fn live(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry.clone())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.live(key).map(|e| e.value) {
            None => Ok(None),
            Some(MemoryValue::Scalar(data)) => Ok(Some(data.as_ref().clone())),
            Some(MemoryValue::List(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Scalar(Arc::new(value.to_vec())),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live(key).is_some())
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, StoreError> {
        Ok(match self.live(key).map(|e| e.value) {
            None => KeyType::None,
            Some(MemoryValue::Scalar(_)) => KeyType::String,
            Some(MemoryValue::List(_)) => KeyType::List,
        })
    }

    async fn rpush(&self, key: &str, values: &[Vec<u8>]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(MemoryEntry {
                        value: MemoryValue::List(values.to_vec()),
                        expires_at: None,
                    });
                    return Ok(());
                }
                match &mut occupied.get_mut().value {
                    MemoryValue::List(items) => items.extend_from_slice(values),
                    MemoryValue::Scalar(_) => return Err(StoreError::WrongType(key.to_string())),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry {
                    value: MemoryValue::List(values.to_vec()),
                    expires_at: None,
                });
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        match self.live(key).map(|e| e.value) {
            None => Ok(Vec::new()),
            Some(MemoryValue::List(items)) => Ok(items),
            Some(MemoryValue::Scalar(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn replace_list(&self, key: &str, values: &[Vec<u8>], ttl: Duration) -> Result<(), StoreError> {
        if values.is_empty() {
            self.entries.remove(key);
            return Ok(());
        }
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::List(values.to_vec()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}
