//! Backend adapters
//!
//! Every cache technology sits behind [`BackendAdapter`], one implementation
//! per backend:
//!
//! - [`RedisAdapter`] - standalone or cluster Redis, cursor-based listing
//! - [`MemcachedAdapter`] - `async-memcached` client, snapshot listing via `metadump`
//! - [`MemoryStore`] - in-process store, snapshot listing
//!
//! Wrap any adapter with [`TracedAdapter`] for debug spans per operation.

mod memcached;
mod memory;
mod redis;
mod traced;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use self::memcached::MemcachedAdapter;
pub use self::memory::MemoryStore;
pub use self::redis::RedisAdapter;
pub use self::traced::TracedAdapter;
use crate::config::{BackendConfig, ServerConfig};
use crate::error::Result;
use crate::key::{Key, KeySummary, KeyType, Ttl};
use crate::pattern::Pattern;

/// Backend technology of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Redis,
    Memcached,
    Memory,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memcached => "memcached",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&BackendConfig> for BackendKind {
    fn from(config: &BackendConfig) -> Self {
        match config {
            BackendConfig::Redis(_) => Self::Redis,
            BackendConfig::Memcached(_) => Self::Memcached,
            BackendConfig::Memory(_) => Self::Memory,
        }
    }
}

/// How a backend lists its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationStrategy {
    /// Repeated calls with an evolving cursor until the backend reports done.
    Cursor,
    /// One call returns the complete listing.
    Snapshot,
}

/// One step of key enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBatch {
    pub keys: Vec<Key>,
    /// Cursor for the next call, `None` once enumeration is complete.
    pub next: Option<String>,
}

impl KeyBatch {
    #[must_use]
    pub const fn done(keys: Vec<Key>) -> Self {
        Self { keys, next: None }
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.next.is_none()
    }
}

/// Uniform capability interface over cache backends.
///
/// All operations are async to support network-based backends.
#[async_trait]
pub trait BackendAdapter: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn strategy(&self) -> EnumerationStrategy;

    /// Raw stored bytes, `None` if the key does not exist.
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>>;

    /// Store a value. `Ok(false)` means the backend declined the write.
    async fn set(&self, key: &Key, value: &[u8], ttl: Option<Duration>) -> Result<bool>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &Key) -> Result<bool>;

    async fn exists(&self, key: &Key) -> Result<bool>;

    async fn ttl(&self, key: &Key) -> Result<Ttl>;

    async fn type_of(&self, key: &Key) -> Result<KeyType>;

    /// Bytes for strings, element count for collections.
    async fn size_of(&self, key: &Key) -> Result<Option<u64>>;

    /// Remove every key in the configured database.
    async fn flush_all(&self) -> Result<()>;

    /// List keys matching `pattern`, starting at `cursor` (`None` = start).
    async fn enumerate_keys(&self, pattern: &Pattern, cursor: Option<&str>) -> Result<KeyBatch>;

    /// Metadata for several keys, in input order.
    ///
    /// Keys that vanished in the meantime come back as missing summaries.
    async fn summarize(&self, keys: &[Key]) -> Result<Vec<KeySummary>> {
        let mut summaries = Vec::with_capacity(keys.len());
        for key in keys {
            summaries.push(summarize_key(self, key).await?);
        }
        Ok(summaries)
    }

    async fn health_check(&self) -> Result<()>;
}

/// Read type, ttl and size of one key through the adapter.
pub async fn summarize_key<A>(adapter: &A, key: &Key) -> Result<KeySummary>
where
    A: BackendAdapter + ?Sized,
{
    let key_type = adapter.type_of(key).await?;
    if key_type == KeyType::None {
        return Ok(KeySummary::missing(key.clone()));
    }

    let ttl = adapter.ttl(key).await?;
    if ttl.is_missing() {
        return Ok(KeySummary::missing(key.clone()));
    }

    // size is informational; a key that cannot be sized is still listed
    let size = adapter.size_of(key).await.unwrap_or_else(|err| {
        tracing::debug!(key = %key, error = %err, "size unavailable");
        None
    });

    Ok(KeySummary {
        key: key.clone(),
        key_type,
        ttl,
        size,
    })
}

/// Connect to a configured server, wrapped in a [`TracedAdapter`].
///
/// Memory servers get a fresh store; share one across connections with
/// [`crate::pool::AdapterManager`].
pub async fn connect_adapter(server: &ServerConfig) -> Result<Box<dyn BackendAdapter>> {
    tracing::debug!(server = %server.name, backend = %BackendKind::from(&server.backend), "connecting");

    let adapter: Box<dyn BackendAdapter> = match &server.backend {
        BackendConfig::Redis(config) => Box::new(TracedAdapter::new(
            RedisAdapter::connect(config).await?,
            &server.name,
        )),
        BackendConfig::Memcached(config) => Box::new(TracedAdapter::new(
            MemcachedAdapter::connect(config).await?,
            &server.name,
        )),
        BackendConfig::Memory(config) => Box::new(TracedAdapter::new(
            MemoryStore::from_config(config),
            &server.name,
        )),
    };
    Ok(adapter)
}
