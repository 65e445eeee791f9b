use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::codec::CodecError;

/// Store key for one logical call.
///
/// Format: `{prefix}:{operation}:{sha256(canonical args)}`. Arguments are
/// encoded as JSON with object keys sorted at every level, so field order
/// never matters. Resource handles (HTTP clients, sessions) must be marked
/// `#[serde(skip)]` on the argument type so that calls served by different
/// handles share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive<A>(prefix: &str, operation: &str, args: &A) -> Result<Self, CodecError>
    where
        A: Serialize + ?Sized,
    {
        let value = serde_json::to_value(args).map_err(CodecError::Key)?;
        let canonical = serde_json::to_vec(&canonicalize(value)).map_err(CodecError::Key)?;
        let digest = hex::encode(Sha256::digest(&canonical));
        Ok(Self(format!("{prefix}:{operation}:{digest}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
