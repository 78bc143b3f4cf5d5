//! Traced adapter wrapper for observability

use std::time::Duration;

use async_trait::async_trait;
use tracing::Instrument;

use super::{BackendAdapter, BackendKind, EnumerationStrategy, KeyBatch};
use crate::error::Result;
use crate::key::{Key, KeySummary, KeyType, Ttl};
use crate::pattern::Pattern;

/// Wrapper that adds tracing to any [`BackendAdapter`]
///
/// Spans are debug-level because keys often carry user identifiers.
#[derive(Debug, Clone)]
pub struct TracedAdapter<A> {
    inner: A,
    server: String,
}

impl<A> TracedAdapter<A> {
    pub fn new(adapter: A, server: impl Into<String>) -> Self {
        Self {
            inner: adapter,
            server: server.into(),
        }
    }

    pub const fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: BackendAdapter> BackendAdapter for TracedAdapter<A> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn strategy(&self) -> EnumerationStrategy {
        self.inner.strategy()
    }

    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let span = tracing::debug_span!(
            "adapter.get",
            server = %self.server,
            backend = %self.inner.kind(),
            key = %key,
        );

        let result = self.inner.get(key).instrument(span).await;

        match &result {
            Ok(Some(data)) => {
                tracing::debug!(result = "hit", key = %key, size_bytes = data.len());
            }
            Ok(None) => tracing::debug!(result = "miss", key = %key),
            Err(e) => tracing::warn!(server = %self.server, operation = "get", error = %e),
        }

        result
    }

    async fn set(&self, key: &Key, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let span = tracing::debug_span!(
            "adapter.set",
            server = %self.server,
            key = %key,
            value_size = value.len(),
            ttl_secs = ttl.map(|d| d.as_secs()),
        );

        let result = self.inner.set(key, value, ttl).instrument(span).await;

        match &result {
            Ok(true) => tracing::debug!(operation = "set", key = %key, stored = true),
            Ok(false) => {
                tracing::warn!(server = %self.server, operation = "set", "backend declined the write");
            }
            Err(e) => tracing::warn!(server = %self.server, operation = "set", error = %e),
        }

        result
    }

    async fn delete(&self, key: &Key) -> Result<bool> {
        let span = tracing::debug_span!("adapter.delete", server = %self.server, key = %key);

        let result = self.inner.delete(key).instrument(span).await;

        match &result {
            Ok(deleted) => tracing::debug!(operation = "delete", key = %key, deleted = deleted),
            Err(e) => tracing::warn!(server = %self.server, operation = "delete", error = %e),
        }

        result
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        let span = tracing::debug_span!("adapter.exists", server = %self.server, key = %key);
        self.inner.exists(key).instrument(span).await
    }

    async fn ttl(&self, key: &Key) -> Result<Ttl> {
        let span = tracing::debug_span!("adapter.ttl", server = %self.server, key = %key);
        self.inner.ttl(key).instrument(span).await
    }

    async fn type_of(&self, key: &Key) -> Result<KeyType> {
        let span = tracing::debug_span!("adapter.type_of", server = %self.server, key = %key);
        self.inner.type_of(key).instrument(span).await
    }

    async fn size_of(&self, key: &Key) -> Result<Option<u64>> {
        let span = tracing::debug_span!("adapter.size_of", server = %self.server, key = %key);
        self.inner.size_of(key).instrument(span).await
    }

    async fn flush_all(&self) -> Result<()> {
        let span = tracing::debug_span!("adapter.flush_all", server = %self.server);

        let result = self.inner.flush_all().instrument(span).await;

        match &result {
            Ok(()) => tracing::info!(server = %self.server, "flushed all keys"),
            Err(e) => tracing::warn!(server = %self.server, operation = "flush_all", error = %e),
        }

        result
    }

    async fn enumerate_keys(&self, pattern: &Pattern, cursor: Option<&str>) -> Result<KeyBatch> {
        let span = tracing::debug_span!(
            "adapter.enumerate",
            server = %self.server,
            pattern = %pattern,
            cursor = cursor.unwrap_or("start"),
        );

        let result = self.inner.enumerate_keys(pattern, cursor).instrument(span).await;

        match &result {
            Ok(batch) => tracing::debug!(
                operation = "enumerate",
                keys = batch.keys.len(),
                done = batch.is_done(),
            ),
            Err(e) => tracing::warn!(server = %self.server, operation = "enumerate", error = %e),
        }

        result
    }

    async fn summarize(&self, keys: &[Key]) -> Result<Vec<KeySummary>> {
        let span = tracing::debug_span!("adapter.summarize", server = %self.server, keys = keys.len());

        let result = self.inner.summarize(keys).instrument(span).await;

        if let Err(ref e) = result {
            tracing::warn!(server = %self.server, operation = "summarize", error = %e);
        }

        result
    }

    async fn health_check(&self) -> Result<()> {
        let span = tracing::debug_span!("adapter.health_check", server = %self.server);
        self.inner.health_check().instrument(span).await
    }
}
