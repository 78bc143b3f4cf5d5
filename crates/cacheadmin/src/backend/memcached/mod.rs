//! Memcached adapter.
//!
//! Storage commands go through [`async_memcached::Client`]. Listing and
//! per-key metadata use the [`inspector`] connection.

mod inspector;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_memcached::{AsciiProtocol, Client, Error as ClientError, Status};
use async_trait::async_trait;
use tokio::sync::Mutex;

use self::inspector::{Inspector, is_text_key};
use super::{BackendAdapter, BackendKind, EnumerationStrategy, KeyBatch};
use crate::config::MemcachedConfig;
use crate::constants::{MEMCACHED_MAX_KEY_LENGTH, MEMCACHED_MAX_RELATIVE_EXPIRY};
use crate::error::{Error, Result};
use crate::key::{Key, KeySummary, KeyType, Ttl};
use crate::pattern::Pattern;

/// Memcached backend over one client connection and one inspector
/// connection.
///
/// Requests are serialized per connection; pool several adapters for
/// parallelism.
pub struct MemcachedAdapter {
    client: Mutex<Client>,
    inspector: Inspector,
    dsn: String,
}

impl std::fmt::Debug for MemcachedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedAdapter")
            .field("dsn", &self.dsn)
            .field("inspector", &self.inspector)
            .finish_non_exhaustive()
    }
}

impl MemcachedAdapter {
    pub async fn connect(config: &MemcachedConfig) -> Result<Self> {
        let dsn = config.dsn();
        let client = Client::new(&dsn).await.map_err(|e| {
            Error::Connection(format!("Failed to connect to memcached at {dsn}: {e}"))
        })?;
        tracing::debug!(dsn = %dsn, "memcached connected");

        Ok(Self {
            client: Mutex::new(client),
            inspector: Inspector::new(config),
            dsn,
        })
    }
}

#[async_trait]
impl BackendAdapter for MemcachedAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Memcached
    }

    fn strategy(&self) -> EnumerationStrategy {
        EnumerationStrategy::Snapshot
    }

    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let value = self
            .client
            .lock()
            .await
            .get(key.as_bytes())
            .await
            .map_err(client_error)?;
        Ok(value.map(|v| payload(v.data)))
    }

    async fn set(&self, key: &Key, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        validate_key(key)?;
        let exptime = i64::try_from(expiry_field(ttl, unix_now())).unwrap_or(i64::MAX);

        let mut client = self.client.lock().await;
        match client.set(key.as_bytes(), value, Some(exptime), None).await {
            Ok(()) => Ok(true),
            Err(ClientError::Protocol(Status::NotStored)) => Ok(false),
            Err(err) => Err(Error::write(key, err.to_string())),
        }
    }

    async fn delete(&self, key: &Key) -> Result<bool> {
        validate_key(key)?;
        let mut client = self.client.lock().await;
        match client.delete(key.as_bytes()).await {
            Ok(()) => Ok(true),
            Err(ClientError::Protocol(Status::NotFound)) => Ok(false),
            Err(err) => Err(client_error(err)),
        }
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        Ok(self.inspector.meta(key).await?.is_some())
    }

    async fn ttl(&self, key: &Key) -> Result<Ttl> {
        Ok(self
            .inspector
            .meta(key)
            .await?
            .map_or(Ttl::Missing, |m| Ttl::from_secs(m.exp)))
    }

    async fn type_of(&self, key: &Key) -> Result<KeyType> {
        Ok(if self.inspector.meta(key).await?.is_some() {
            KeyType::String
        } else {
            KeyType::None
        })
    }

    async fn size_of(&self, key: &Key) -> Result<Option<u64>> {
        Ok(self.inspector.meta(key).await?.and_then(|m| m.size))
    }

    async fn flush_all(&self) -> Result<()> {
        self.client
            .lock()
            .await
            .flush_all()
            .await
            .map_err(client_error)
    }

    async fn enumerate_keys(&self, pattern: &Pattern, cursor: Option<&str>) -> Result<KeyBatch> {
        if cursor.is_some() {
            return Err(Error::validation("snapshot listings take no cursor"));
        }
        let keys = self.inspector.list_keys(pattern, unix_now()).await?;
        Ok(KeyBatch::done(keys))
    }

    async fn summarize(&self, keys: &[Key]) -> Result<Vec<KeySummary>> {
        Ok(self.inspector.summarize(keys).await)
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .lock()
            .await
            .version()
            .await
            .map(drop)
            .map_err(client_error)
    }
}

fn client_error(err: ClientError) -> Error {
    match err {
        ClientError::Io(e) => Error::Connection(format!("memcached: {e}")),
        other => Error::Backend(format!("memcached: {other}")),
    }
}

/// Value bytes; a reply without data reads as empty.
fn payload(data: impl Into<Option<Vec<u8>>>) -> Vec<u8> {
    data.into().unwrap_or_default()
}

/// Keys must be 1..=250 bytes without whitespace or control bytes.
///
/// Listings may still show other keys; those can be inspected but not
/// read or written.
fn validate_key(key: &Key) -> Result<()> {
    if key.is_empty() || key.len() > MEMCACHED_MAX_KEY_LENGTH {
        return Err(Error::validation(format!(
            "memcached keys must be 1 to {MEMCACHED_MAX_KEY_LENGTH} bytes"
        )));
    }
    if !is_text_key(key.as_bytes()) {
        return Err(Error::validation(format!(
            "memcached key {key} contains whitespace or control bytes"
        )));
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// `exptime` field for storage commands.
///
/// Memcached reads values over 30 days as a unix timestamp, and 0 as
/// "never", so sub-second TTLs round up to one second.
fn expiry_field(ttl: Option<Duration>, now: u64) -> u64 {
    let Some(ttl) = ttl else {
        return 0;
    };
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    let secs = secs.max(1);
    if secs > MEMCACHED_MAX_RELATIVE_EXPIRY {
        now + secs
    } else {
        secs
    }
}
