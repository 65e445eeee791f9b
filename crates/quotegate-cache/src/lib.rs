//! Result cache for upstream operations.
//!
//! ## Architecture
//!
//! - **Store** ([`KvStore`]): Redis when configured and reachable, otherwise
//!   an in-process map with the same expiry semantics
//! - **Codec**: closed set of encodable shapes (registered scalar, list of
//!   registered scalars, raw bytes)
//! - **Manager** ([`CacheManager`]): per-key critical section around
//!   "consult store, populate on miss" with a TTL picked from market status
//!
//! ```text
//! cached(op, args) → key → lock(key) → store hit? ── yes ──► decode
//!                                         │ no
//!                                         ▼
//!                                     produce() → encode → SET/RPUSH + EXPIRE
//! ```
//!
//! ## Graceful Degradation
//!
//! Store errors never surface to callers: a failed read is a miss and a
//! failed write is logged after the value has been produced.

pub mod codec;
pub mod key;
pub mod manager;
pub mod redis_store;
pub mod store;

pub use codec::{CacheRecord, Cacheable, CodecError, RawBytes, Registered};
pub use key::CacheKey;
pub use manager::{CacheManager, TtlPolicy};
pub use redis_store::{RedisConfig, RedisStore, connect_store};
pub use store::{KeyType, KvStore, MemoryStore, StoreError};
