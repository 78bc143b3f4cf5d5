//! Per-server adapter pools

use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{self, Metrics, PoolError, RecycleError, RecycleResult, TimeoutType};

use crate::backend::{BackendAdapter, MemoryStore, TracedAdapter, connect_adapter};
use crate::config::{BackendConfig, PoolConfig, ServerConfig};
use crate::error::{Error, Result};

pub type Pool = managed::Pool<AdapterManager>;
pub type PooledAdapter = managed::Object<AdapterManager>;

/// Hands out adapters for one server.
///
/// Network backends get a fresh connection per pool slot. In-process stores
/// and injected adapters are shared by every slot.
#[derive(Debug)]
pub struct AdapterManager {
    server: String,
    source: AdapterSource,
}

#[derive(Debug)]
enum AdapterSource {
    Connect(ServerConfig),
    Shared(Arc<dyn BackendAdapter>),
}

impl AdapterManager {
    pub fn new(server: ServerConfig) -> Self {
        let name = server.name.clone();
        let source = match &server.backend {
            BackendConfig::Memory(config) => AdapterSource::Shared(Arc::new(TracedAdapter::new(
                MemoryStore::from_config(config),
                &name,
            ))),
            _ => AdapterSource::Connect(server),
        };
        Self {
            server: name,
            source,
        }
    }

    /// Manager that always hands out `adapter`.
    pub fn shared(server: impl Into<String>, adapter: Arc<dyn BackendAdapter>) -> Self {
        Self {
            server: server.into(),
            source: AdapterSource::Shared(adapter),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

impl managed::Manager for AdapterManager {
    type Type = Arc<dyn BackendAdapter>;
    type Error = Error;

    async fn create(&self) -> Result<Arc<dyn BackendAdapter>> {
        match &self.source {
            AdapterSource::Connect(config) => Ok(Arc::from(connect_adapter(config).await?)),
            AdapterSource::Shared(adapter) => Ok(Arc::clone(adapter)),
        }
    }

    async fn recycle(
        &self,
        adapter: &mut Arc<dyn BackendAdapter>,
        _: &Metrics,
    ) -> RecycleResult<Self::Error> {
        adapter.health_check().await.map_err(|e| {
            tracing::debug!(server = %self.server, error = %e, "dropping unhealthy adapter");
            RecycleError::Backend(e)
        })
    }
}

pub fn create_pool(manager: AdapterManager, config: &PoolConfig) -> Result<Pool> {
    Pool::builder(manager)
        .max_size(config.max_size.get())
        .wait_timeout(config.wait_timeout)
        .create_timeout(Some(Duration::from_secs(30)))
        .recycle_timeout(Some(Duration::from_secs(5)))
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create adapter pool: {e}")))
}

/// Flatten pool failures into the console error type.
pub fn map_pool_error(err: PoolError<Error>) -> Error {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(TimeoutType::Wait) => Error::PoolExhausted,
        PoolError::Timeout(TimeoutType::Create) => {
            Error::Connection("timed out connecting to server".into())
        }
        PoolError::Timeout(TimeoutType::Recycle) => {
            Error::Connection("timed out checking connection health".into())
        }
        other => Error::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::config::MemoryConfig;
    use crate::key::Key;

    #[tokio::test]
    async fn test_memory_slots_share_store() {
        let manager = AdapterManager::new(ServerConfig::memory("local", MemoryConfig::default()));
        let config = PoolConfig {
            max_size: NonZeroUsize::new(2).unwrap(),
            wait_timeout: Some(Duration::from_millis(100)),
        };
        let pool = create_pool(manager, &config).unwrap();

        let first = pool.get().await.unwrap();
        let second = pool.get().await.unwrap();
        first.set(&Key::from("k"), b"v", None).await.unwrap();
        assert_eq!(second.get(&Key::from("k")).await.unwrap().unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_exhausted_pool() {
        let manager = AdapterManager::new(ServerConfig::memory("local", MemoryConfig::default()));
        let config = PoolConfig {
            max_size: NonZeroUsize::MIN,
            wait_timeout: Some(Duration::from_millis(20)),
        };
        let pool = create_pool(manager, &config).unwrap();

        let _held = pool.get().await.unwrap();
        let err = pool.get().await.map_err(map_pool_error).unwrap_err();
        assert!(err.is_pool_exhausted());
    }

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let manager = AdapterManager::new(ServerConfig::memory("local", MemoryConfig::default()));
        let config = PoolConfig {
            max_size: NonZeroUsize::MIN,
            wait_timeout: Some(Duration::from_millis(20)),
        };
        let pool = create_pool(manager, &config).unwrap();

        drop(pool.get().await.unwrap());
        assert!(pool.get().await.is_ok());
    }

    #[test]
    fn test_map_pool_error() {
        let err = map_pool_error(PoolError::Backend(Error::Connection("refused".into())));
        assert!(err.is_connection());

        let err = map_pool_error(PoolError::Timeout(TimeoutType::Create));
        assert!(err.is_connection());

        let err = map_pool_error(PoolError::Closed);
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_as_connection_error() {
        let server = ServerConfig::memcached(
            "down",
            crate::config::MemcachedConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                path: None,
            },
        );
        let pool = create_pool(AdapterManager::new(server), &PoolConfig::default()).unwrap();
        let err = pool.get().await.map_err(map_pool_error).unwrap_err();
        assert!(err.is_connection());
    }
}
