//! Read, save and delete operations that keep the codec pipeline symmetric.
//!
//! Values are decoded after fetching and encoded before storing, using the
//! same [`CodecPipeline`]. Formatter output is display only and never reaches
//! the encode side.

use std::sync::Arc;
use std::time::Duration;

use cacheadmin_codec::{CodecPipeline, DecodedValue};
use serde::Serialize;

use crate::backend::BackendAdapter;
use crate::error::{Error, Result};
use crate::key::Key;

/// Outcome of a bulk delete. One key failing never aborts the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted_count: usize,
    /// Keys that were absent or could not be deleted, in request order.
    pub failed_keys: Vec<Key>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed_keys.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct KeyService {
    pipeline: Arc<CodecPipeline>,
}

impl KeyService {
    pub const fn new(pipeline: Arc<CodecPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &CodecPipeline {
        &self.pipeline
    }

    /// Fetch `key` and decode it for display.
    pub async fn read_for_display(
        &self,
        adapter: &dyn BackendAdapter,
        key: &Key,
    ) -> Result<DecodedValue> {
        let raw = adapter
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        Ok(self.pipeline.decode_for_display(&raw))
    }

    /// Encode `text` with `encoder` and write it.
    ///
    /// `encoder` is normally the `matched_encoder` returned by
    /// [`read_for_display`](Self::read_for_display). `ttl` of `None` stores
    /// without expiry. The text is stored literally; use
    /// [`save_decoded`](Self::save_decoded) for values read as binary.
    pub async fn save(
        &self,
        adapter: &dyn BackendAdapter,
        key: &Key,
        text: &str,
        encoder: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.save_bytes(adapter, key, text.as_bytes(), encoder, ttl)
            .await
    }

    /// Write back a value obtained from [`read_for_display`](Self::read_for_display),
    /// restoring escaped binary text to its exact bytes.
    pub async fn save_decoded(
        &self,
        adapter: &dyn BackendAdapter,
        key: &Key,
        value: &DecodedValue,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = value.to_bytes()?;
        self.save_bytes(adapter, key, &bytes, value.matched_encoder.as_deref(), ttl)
            .await
    }

    pub async fn save_bytes(
        &self,
        adapter: &dyn BackendAdapter,
        key: &Key,
        value: &[u8],
        encoder: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(Error::validation("key must not be empty"));
        }
        if ttl.is_some_and(|t| t.is_zero()) {
            return Err(Error::validation("ttl must be positive"));
        }
        if let Some(name) = encoder
            && !self.pipeline.knows_encoder(name)
        {
            return Err(Error::validation(format!("unknown encoder: {name}")));
        }

        let bytes = self.pipeline.encode_bytes(value, encoder)?;
        if adapter.set(key, &bytes, ttl).await? {
            Ok(())
        } else {
            Err(Error::write(key, "backend declined the write"))
        }
    }

    /// Returns false if the key did not exist.
    pub async fn delete_one(&self, adapter: &dyn BackendAdapter, key: &Key) -> Result<bool> {
        adapter.delete(key).await
    }

    pub async fn delete_many(&self, adapter: &dyn BackendAdapter, keys: &[Key]) -> DeleteReport {
        let mut report = DeleteReport::default();
        for key in keys {
            match adapter.delete(key).await {
                Ok(true) => report.deleted_count += 1,
                Ok(false) => report.failed_keys.push(key.clone()),
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "delete failed");
                    report.failed_keys.push(key.clone());
                }
            }
        }
        report
    }

    /// Remove every key on the server. Callers confirm first.
    pub async fn flush(&self, adapter: &dyn BackendAdapter) -> Result<()> {
        adapter.flush_all().await
    }
}

impl Default for KeyService {
    fn default() -> Self {
        Self::new(Arc::new(CodecPipeline::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::config::MemoryConfig;

    const ZLIB_TEST: &[u8] = &[
        0x78, 0x9c, 0x2b, 0x49, 0x2d, 0x2e, 0x01, 0x00, 0x04, 0x5d, 0x01, 0xc1,
    ];

    #[tokio::test]
    async fn test_read_missing_key() {
        let store = MemoryStore::new();
        let err = KeyService::default()
            .read_for_display(&store, &Key::from("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_decodes_zlib() {
        let store = MemoryStore::new();
        let key = Key::from("blob");
        store.set(&key, ZLIB_TEST, None).await.unwrap();

        let value = KeyService::default()
            .read_for_display(&store, &key)
            .await
            .unwrap();
        assert_eq!(value.display, "test");
        assert_eq!(value.matched_encoder.as_deref(), Some("gzcompress"));
    }

    #[tokio::test]
    async fn test_save_round_trip_with_matched_encoder() {
        let store = MemoryStore::new();
        let key = Key::from("blob");
        store.set(&key, ZLIB_TEST, None).await.unwrap();
        let service = KeyService::default();

        let read = service.read_for_display(&store, &key).await.unwrap();
        service
            .save(&store, &key, "updated", read.matched_encoder.as_deref(), None)
            .await
            .unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_ne!(stored, b"updated");
        let again = service.read_for_display(&store, &key).await.unwrap();
        assert_eq!(again.display, "updated");
        assert_eq!(again.matched_encoder.as_deref(), Some("gzcompress"));
    }

    #[tokio::test]
    async fn test_binary_value_read_then_saved_is_unchanged() {
        let store = MemoryStore::new();
        let key = Key::from("bin");
        let service = KeyService::default();
        let original = b"\xff\xfe\0bin";
        let stored = service
            .pipeline()
            .encode_bytes(original, Some("gzcompress"))
            .unwrap();
        store.set(&key, &stored, None).await.unwrap();

        let read = service.read_for_display(&store, &key).await.unwrap();
        assert!(read.binary);
        service.save_decoded(&store, &key, &read, None).await.unwrap();

        let again = service.read_for_display(&store, &key).await.unwrap();
        assert_eq!(again.matched_encoder.as_deref(), Some("gzcompress"));
        assert_eq!(again.to_bytes().unwrap(), original);
    }

    #[tokio::test]
    async fn test_malformed_binary_text_is_not_written() {
        let store = MemoryStore::new();
        let key = Key::from("bin");
        let mut value = KeyService::default().pipeline().decode_for_display(b"\xff");
        value.text.push_str(r"\q");

        let err = KeyService::default()
            .save_decoded(&store, &key, &value, None)
            .await
            .unwrap_err();
        assert!(err.is_codec());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_without_encoder_stores_raw() {
        let store = MemoryStore::new();
        let key = Key::from("plain");
        KeyService::default()
            .save(&store, &key, "hello", None, Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(store.get(&key).await.unwrap().unwrap(), b"hello");
        assert!(store.ttl(&key).await.unwrap().remaining().is_some());
    }

    #[tokio::test]
    async fn test_save_never_stores_formatter_output() {
        let store = MemoryStore::new();
        let key = Key::from("doc");
        let service = KeyService::default();
        service
            .save(&store, &key, r#"{"a":1}"#, Some("gzcompress"), None)
            .await
            .unwrap();

        let read = service.read_for_display(&store, &key).await.unwrap();
        assert_eq!(read.text, r#"{"a":1}"#);
        assert_ne!(read.display, read.text);
    }

    #[tokio::test]
    async fn test_save_validation() {
        let store = MemoryStore::new();
        let service = KeyService::default();

        let err = service
            .save(&store, &Key::from(""), "v", None, None)
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = service
            .save(&store, &Key::from("k"), "v", None, Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = service
            .save(&store, &Key::from("k"), "v", Some("brotli"), None)
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_declined_write_is_write_error() {
        let store = MemoryStore::from_config(&MemoryConfig {
            max_entries: None,
            max_value_size: Some(2),
        });
        let err = KeyService::default()
            .save(&store, &Key::from("k"), "too long", None, None)
            .await
            .unwrap_err();
        assert!(err.is_write());
    }

    #[tokio::test]
    async fn test_delete_many_reports_missing() {
        let store = MemoryStore::new();
        for key in ["a", "b"] {
            store.set(&Key::from(key), b"v", None).await.unwrap();
        }

        let keys = [Key::from("a"), Key::from("ghost"), Key::from("b")];
        let report = KeyService::default().delete_many(&store, &keys).await;
        assert_eq!(report.deleted_count, 2);
        assert_eq!(report.failed_keys, [Key::from("ghost")]);
        assert!(!report.is_complete());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_one_and_flush() {
        let store = MemoryStore::new();
        let service = KeyService::default();
        store.set(&Key::from("a"), b"v", None).await.unwrap();
        store.set(&Key::from("b"), b"v", None).await.unwrap();

        assert!(service.delete_one(&store, &Key::from("a")).await.unwrap());
        assert!(!service.delete_one(&store, &Key::from("a")).await.unwrap());

        service.flush(&store).await.unwrap();
        assert!(store.is_empty());
    }
}
