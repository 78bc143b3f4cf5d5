//! In-process key/value store with TTL support

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{BackendAdapter, BackendKind, EnumerationStrategy, KeyBatch};
use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::key::{Key, KeySummary, KeyType, Ttl};
use crate::pattern::Pattern;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    fn ttl(&self, now: Instant) -> Ttl {
        match self.expires_at {
            None => Ttl::Persistent,
            Some(exp) if now < exp => Ttl::Expires(exp - now),
            Some(_) => Ttl::Missing,
        }
    }
}

/// Thread-safe in-process store, listed as a snapshot.
///
/// Clones share the same entries, so several pooled handles see one store.
/// Expired entries are invisible immediately and purged on the next write.
///
/// Writes are declined (`Ok(false)`) instead of evicting when `max_entries`
/// or `max_value_size` would be exceeded.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<Key, Entry>>>,
    max_entries: Option<usize>,
    max_value_size: Option<usize>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("max_entries", &self.max_entries)
            .field("max_value_size", &self.max_value_size)
            .field("entry_count", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            entries: Arc::default(),
            max_entries: config.max_entries,
            max_value_size: config.max_value_size,
        }
    }

    #[must_use]
    pub const fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    #[must_use]
    pub const fn with_max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = Some(max);
        self
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_live<T>(&self, key: &Key, f: impl FnOnce(&Entry, Instant) -> T) -> Option<T> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| f(e, now))
    }
}

#[async_trait]
impl BackendAdapter for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn strategy(&self) -> EnumerationStrategy {
        EnumerationStrategy::Snapshot
    }

    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        Ok(self.with_live(key, |e, _| e.value.clone()))
    }

    async fn set(&self, key: &Key, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        if self.max_value_size.is_some_and(|max| value.len() > max) {
            return Ok(false);
        }

        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, e| !e.is_expired(now));

        if let Some(max) = self.max_entries
            && entries.len() >= max
            && !entries.contains_key(key)
        {
            return Ok(false);
        }

        entries.insert(
            key.clone(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|d| now + d),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &Key) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .remove(key)
            .is_some_and(|e| !e.is_expired(now)))
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        Ok(self.with_live(key, |_, _| ()).is_some())
    }

    async fn ttl(&self, key: &Key) -> Result<Ttl> {
        Ok(self.with_live(key, Entry::ttl).unwrap_or(Ttl::Missing))
    }

    async fn type_of(&self, key: &Key) -> Result<KeyType> {
        Ok(self
            .with_live(key, |_, _| KeyType::String)
            .unwrap_or(KeyType::None))
    }

    async fn size_of(&self, key: &Key) -> Result<Option<u64>> {
        Ok(self.with_live(key, |e, _| e.value.len() as u64))
    }

    async fn flush_all(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    async fn enumerate_keys(&self, pattern: &Pattern, cursor: Option<&str>) -> Result<KeyBatch> {
        if cursor.is_some() {
            return Err(Error::validation("snapshot listings take no cursor"));
        }

        let now = Instant::now();
        let keys = self
            .entries
            .read()
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && pattern.matches(k.as_bytes()))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(KeyBatch::done(keys))
    }

    async fn summarize(&self, keys: &[Key]) -> Result<Vec<KeySummary>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .map(|key| match entries.get(key) {
                Some(e) if !e.is_expired(now) => KeySummary {
                    key: key.clone(),
                    key_type: KeyType::String,
                    ttl: e.ttl(now),
                    size: Some(e.value.len() as u64),
                },
                _ => KeySummary::missing(key.clone()),
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
