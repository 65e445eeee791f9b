//! Encoding of cached values.
//!
//! Only three shapes can be cached:
//!
//! | shape | Rust type | stored as |
//! |-------|-----------|-----------|
//! | registered scalar | `T: Registered` | one string value, tagged envelope |
//! | list of scalars | `Vec<T: Registered>` | one list element per item, in order |
//! | raw bytes | [`RawBytes`] | one string value, untagged |
//!
//! Tagged envelopes are JSON: `{"type": "<tag>", "data": <value>}`. Date/time
//! fields are expected to serialize as RFC 3339 strings
//! (`#[serde(with = "time::serde::rfc3339")]`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quotegate_core::OperationError;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The value cannot be represented; this is a programming error.
    #[error("Cannot encode value of type '{tag}': {source}")]
    Encode {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot decode cached value of type '{tag}': {source}")]
    Decode {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cached value has type '{found}', expected '{expected}'")]
    TagMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("Cached value is a {found}, expected a {expected}")]
    ShapeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Cache key arguments cannot be encoded: {0}")]
    Key(#[source] serde_json::Error),
}

impl CodecError {
    /// Encoding failures are raised to the caller; decode failures are
    /// treated as cache misses.
    pub fn is_encode_failure(&self) -> bool {
        matches!(self, Self::Encode { .. } | Self::Key(_))
    }
}

impl From<CodecError> for OperationError {
    fn from(e: CodecError) -> Self {
        OperationError::Serialization(e.to_string())
    }
}

/// A value read from or written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRecord {
    Scalar(Vec<u8>),
    List(Vec<Vec<u8>>),
}

impl CacheRecord {
    fn shape(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::List(_) => "list",
        }
    }
}

/// A domain type with a stable name used as its type tag.
///
/// Register types with [`register_type!`](crate::register_type), which also
/// makes them [`Cacheable`] as scalars.
pub trait Registered: Serialize + DeserializeOwned {
    const TAG: &'static str;
}

/// Types the cache manager can store and restore.
pub trait Cacheable: Sized {
    fn encode(&self) -> Result<CacheRecord, CodecError>;
    fn decode(record: CacheRecord) -> Result<Self, CodecError>;
}

/// Implement [`Registered`] and scalar [`Cacheable`] for a serde type.
#[macro_export]
macro_rules! register_type {
    ($ty:ty, $tag:literal) => {
        impl $crate::codec::Registered for $ty {
            const TAG: &'static str = $tag;
        }

        impl $crate::codec::Cacheable for $ty {
            fn encode(
                &self,
            ) -> ::core::result::Result<$crate::codec::CacheRecord, $crate::codec::CodecError> {
                $crate::codec::encode_element(self).map($crate::codec::CacheRecord::Scalar)
            }

            fn decode(
                record: $crate::codec::CacheRecord,
            ) -> ::core::result::Result<Self, $crate::codec::CodecError> {
                match record {
                    $crate::codec::CacheRecord::Scalar(bytes) => {
                        $crate::codec::decode_element(&bytes)
                    }
                    $crate::codec::CacheRecord::List(_) => {
                        Err($crate::codec::CodecError::ShapeMismatch {
                            expected: "scalar",
                            found: "list",
                        })
                    }
                }
            }
        }
    };
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    #[serde(rename = "type")]
    tag: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    data: serde_json::Value,
}

/// Encode one registered value as a tagged envelope.
pub fn encode_element<T: Registered>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&EnvelopeRef {
        tag: T::TAG,
        data: value,
    })
    .map_err(|source| CodecError::Encode { tag: T::TAG, source })
}

/// Decode one tagged envelope, checking its tag against `T`.
pub fn decode_element<T: Registered>(bytes: &[u8]) -> Result<T, CodecError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|source| CodecError::Decode { tag: T::TAG, source })?;
    if envelope.tag != T::TAG {
        return Err(CodecError::TagMismatch {
            expected: T::TAG,
            found: envelope.tag,
        });
    }
    serde_json::from_value(envelope.data).map_err(|source| CodecError::Decode { tag: T::TAG, source })
}

impl<T: Registered> Cacheable for Vec<T> {
    fn encode(&self) -> Result<CacheRecord, CodecError> {
        self.iter()
            .map(encode_element)
            .collect::<Result<Vec<_>, _>>()
            .map(CacheRecord::List)
    }

    fn decode(record: CacheRecord) -> Result<Self, CodecError> {
        match record {
            CacheRecord::List(items) => items.iter().map(|item| decode_element(item)).collect(),
            other => Err(CodecError::ShapeMismatch {
                expected: "list",
                found: other.shape(),
            }),
        }
    }
}

/// Opaque bytes cached without a type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBytes(pub Vec<u8>);

impl Cacheable for RawBytes {
    fn encode(&self) -> Result<CacheRecord, CodecError> {
        Ok(CacheRecord::Scalar(self.0.clone()))
    }

    fn decode(record: CacheRecord) -> Result<Self, CodecError> {
        match record {
            CacheRecord::Scalar(bytes) => Ok(RawBytes(bytes)),
            other => Err(CodecError::ShapeMismatch {
                expected: "scalar",
                found: other.shape(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use time::OffsetDateTime;
    use time::macros::datetime;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tick {
        symbol: String,
        price: f64,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    }
    crate::register_type!(Tick, "Tick");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Headline {
        title: String,
    }
    crate::register_type!(Headline, "Headline");

    #[derive(Debug, Serialize, Deserialize)]
    struct Matrix {
        cells: HashMap<(u8, u8), f64>,
    }
    crate::register_type!(Matrix, "Matrix");

    // Registration must not depend on which `Result` is in scope at the call site.
    mod aliased_result {
        use quotegate_core::Result;
        use serde::{Deserialize, Serialize};

        use crate::codec::{CacheRecord, Cacheable};

        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct Level {
            pub price: f64,
        }
        crate::register_type!(Level, "Level");

        pub fn restore(record: CacheRecord) -> Result<Level> {
            Ok(Level::decode(record)?)
        }
    }

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick {
            symbol: symbol.into(),
            price,
            at: datetime!(2024-03-01 14:30:00 UTC),
        }
    }

    #[test]
    fn scalar_round_trip_with_iso_timestamp() {
        let value = tick("AAPL", 181.5);
        let record = value.encode().unwrap();

        let CacheRecord::Scalar(ref bytes) = record else {
            panic!("expected scalar record");
        };
        let json: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(json["type"], "Tick");
        assert_eq!(json["data"]["at"], "2024-03-01T14:30:00Z");

        assert_eq!(Tick::decode(record).unwrap(), value);
    }

    #[test]
    fn list_round_trip_preserves_order() {
        let values = vec![tick("B", 2.0), tick("A", 1.0)];
        let record = values.encode().unwrap();

        let CacheRecord::List(ref items) = record else {
            panic!("expected list record");
        };
        assert_eq!(items.len(), 2);
        // every element is independently decodable
        assert_eq!(decode_element::<Tick>(&items[1]).unwrap(), values[1]);

        assert_eq!(Vec::<Tick>::decode(record).unwrap(), values);
    }

    #[test]
    fn raw_bytes_are_untagged() {
        let raw = RawBytes(b"<html></html>".to_vec());
        let record = raw.encode().unwrap();
        assert_eq!(record, CacheRecord::Scalar(b"<html></html>".to_vec()));
        assert_eq!(RawBytes::decode(record).unwrap(), raw);
    }

    #[test]
    fn unencodable_value_is_an_error() {
        let mut cells = HashMap::new();
        cells.insert((0, 1), 0.5);
        let err = Matrix { cells }.encode().unwrap_err();
        assert!(err.is_encode_failure());
        assert!(matches!(err, CodecError::Encode { tag: "Matrix", .. }));

        let op_err: OperationError = err.into();
        assert!(matches!(op_err, OperationError::Serialization(_)));
    }

    #[test]
    fn tag_mismatch_is_rejected() {
        let record = tick("AAPL", 1.0).encode().unwrap();
        let err = Headline::decode(record).unwrap_err();
        assert!(matches!(err, CodecError::TagMismatch { expected: "Headline", .. }));
        assert!(!err.is_encode_failure());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let list = vec![tick("A", 1.0)].encode().unwrap();
        assert!(matches!(
            Tick::decode(list),
            Err(CodecError::ShapeMismatch { expected: "scalar", found: "list" })
        ));

        let scalar = tick("A", 1.0).encode().unwrap();
        assert!(matches!(
            Vec::<Tick>::decode(scalar),
            Err(CodecError::ShapeMismatch { expected: "list", found: "scalar" })
        ));
    }

    #[test]
    fn registration_ignores_result_alias_at_call_site() {
        let level = aliased_result::Level { price: 12.5 };
        let record = level.encode().unwrap();
        assert_eq!(aliased_result::restore(record).unwrap(), level);
    }
}
