//! Key model shared by every backend.
//!
//! Keys are opaque bytes. Redis and the memory store accept any byte string,
//! so nothing here assumes UTF-8.

use std::fmt;
use std::time::Duration;

use cacheadmin_codec::display_bytes;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::REDIS_JSON_TYPE;

/// Cache key as raw bytes, ordered byte-wise.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<u8>);

impl Key {
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// UTF-8 view of the key, if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_bytes(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", display_bytes(&self.0))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// UTF-8 keys travel as JSON strings, anything else as a byte array.
impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_str() {
            Some(s) => serializer.serialize_str(s),
            None => self.0.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = Key;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or an array of bytes")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Key, E> {
                Ok(Key::from(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Key, E> {
                Ok(Key::from(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Key, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(Key(bytes))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

/// Data type of a stored entry, or the backend's closest analog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    List,
    Set,
    Hash,
    ZSet,
    Stream,
    /// RedisJSON document.
    Json,
    Other(String),
    /// The key does not exist (anymore).
    None,
}

impl KeyType {
    /// Map a Redis `TYPE` reply.
    #[must_use]
    pub fn from_redis(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "list" => Self::List,
            "set" => Self::Set,
            "hash" => Self::Hash,
            "zset" => Self::ZSet,
            "stream" => Self::Stream,
            REDIS_JSON_TYPE => Self::Json,
            "none" => Self::None,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::Set => "set",
            Self::Hash => "hash",
            Self::ZSet => "zset",
            Self::Stream => "stream",
            Self::Json => "json",
            Self::Other(name) => name,
            Self::None => "none",
        }
    }

    /// Whether a text value can be written over this type in place.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::String | Self::Json | Self::None)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for KeyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// No expiry set.
    Persistent,
    /// Expires after the given duration. Zero means already expired.
    Expires(Duration),
    /// The key does not exist (anymore).
    Missing,
}

impl Ttl {
    /// Map a Redis `PTTL` reply: `-1` no expiry, `-2` missing.
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        match ms {
            -1 => Self::Persistent,
            ms if ms < 0 => Self::Missing,
            ms => Self::Expires(Duration::from_millis(ms as u64)),
        }
    }

    /// Map a relative TTL in seconds where `-1` means no expiry.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        match secs {
            -1 => Self::Persistent,
            s if s < 0 => Self::Expires(Duration::ZERO),
            s => Self::Expires(Duration::from_secs(s as u64)),
        }
    }

    /// Value used for sorting. Keys without a finite TTL have none.
    #[must_use]
    pub const fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Expires(d) => Some(*d),
            Self::Persistent | Self::Missing => None,
        }
    }

    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl Serialize for Ttl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Ttl", 2)?;
        match self {
            Self::Persistent => {
                state.serialize_field("state", "persistent")?;
                state.serialize_field("seconds", &None::<u64>)?;
            }
            Self::Expires(d) => {
                state.serialize_field("state", "expires")?;
                state.serialize_field("seconds", &Some(d.as_secs()))?;
            }
            Self::Missing => {
                state.serialize_field("state", "missing")?;
                state.serialize_field("seconds", &None::<u64>)?;
            }
        }
        state.end()
    }
}

/// Per-key metadata shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySummary {
    pub key: Key,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub ttl: Ttl,
    /// Bytes for strings, element count for collections.
    pub size: Option<u64>,
}

impl KeySummary {
    /// Summary for a key that disappeared before its metadata was read.
    #[must_use]
    pub const fn missing(key: Key) -> Self {
        Self {
            key,
            key_type: KeyType::None,
            ttl: Ttl::Missing,
            size: None,
        }
    }

    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self.key_type, KeyType::None) || self.ttl.is_missing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_bytewise() {
        let mut keys = vec![Key::from("b"), Key::from(vec![0xff]), Key::from("B"), Key::from("a")];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::from("B"), Key::from("a"), Key::from("b"), Key::from(vec![0xff])]
        );
    }

    #[test]
    fn test_key_display_escapes_binary() {
        let key = Key::from(b"user:\xff".as_slice());
        assert_eq!(key.to_string(), "user:\\xff");
        assert!(key.as_str().is_none());
        assert_eq!(format!("{key:?}"), "Key(\"user:\\\\xff\")");
    }

    #[test]
    fn test_key_serializes_utf8_as_string() {
        let json = serde_json::to_string(&Key::from("user:1")).unwrap();
        assert_eq!(json, "\"user:1\"");
    }

    #[test]
    fn test_key_serializes_binary_as_bytes() {
        let key = Key::from(vec![0x75, 0xff]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "[117,255]");

        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_key_deserializes_string() {
        let key: Key = serde_json::from_str("\"session:9\"").unwrap();
        assert_eq!(key.as_bytes(), b"session:9");
    }

    #[test]
    fn test_key_type_from_redis() {
        assert_eq!(KeyType::from_redis("string"), KeyType::String);
        assert_eq!(KeyType::from_redis("zset"), KeyType::ZSet);
        assert_eq!(KeyType::from_redis("ReJSON-RL"), KeyType::Json);
        assert_eq!(KeyType::from_redis("none"), KeyType::None);
        assert_eq!(
            KeyType::from_redis("MBbloom--"),
            KeyType::Other("MBbloom--".to_string())
        );
    }

    #[test]
    fn test_key_type_writable() {
        assert!(KeyType::String.is_writable());
        assert!(KeyType::Json.is_writable());
        assert!(KeyType::None.is_writable());
        assert!(!KeyType::List.is_writable());
        assert!(!KeyType::Other("x".into()).is_writable());
    }

    #[test]
    fn test_key_type_serializes_as_name() {
        assert_eq!(serde_json::to_string(&KeyType::Hash).unwrap(), "\"hash\"");
        assert_eq!(
            serde_json::to_string(&KeyType::Other("tdigest".into())).unwrap(),
            "\"tdigest\""
        );
    }

    #[test]
    fn test_ttl_from_millis() {
        assert_eq!(Ttl::from_millis(-1), Ttl::Persistent);
        assert_eq!(Ttl::from_millis(-2), Ttl::Missing);
        assert_eq!(Ttl::from_millis(0), Ttl::Expires(Duration::ZERO));
        assert_eq!(
            Ttl::from_millis(1500),
            Ttl::Expires(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_ttl_from_secs() {
        assert_eq!(Ttl::from_secs(-1), Ttl::Persistent);
        assert_eq!(Ttl::from_secs(-5), Ttl::Expires(Duration::ZERO));
        assert_eq!(Ttl::from_secs(60), Ttl::Expires(Duration::from_secs(60)));
    }

    #[test]
    fn test_ttl_remaining() {
        assert_eq!(Ttl::Persistent.remaining(), None);
        assert_eq!(Ttl::Missing.remaining(), None);
        assert_eq!(
            Ttl::Expires(Duration::from_secs(3)).remaining(),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_ttl_serialization() {
        let json = serde_json::to_value(Ttl::Expires(Duration::from_secs(30))).unwrap();
        assert_eq!(json["state"], "expires");
        assert_eq!(json["seconds"], 30);

        let json = serde_json::to_value(Ttl::Persistent).unwrap();
        assert_eq!(json["state"], "persistent");
        assert!(json["seconds"].is_null());
    }

    #[test]
    fn test_missing_summary() {
        let summary = KeySummary::missing(Key::from("gone"));
        assert!(summary.is_missing());
        assert_eq!(summary.size, None);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "none");
        assert_eq!(json["key"], "gone");
    }
}
