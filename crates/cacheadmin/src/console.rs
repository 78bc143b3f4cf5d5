//! Server registry tying pools, the key browser and the key service together.
//!
//! Every operation names its server explicitly and holds one pooled adapter
//! for its own duration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cacheadmin_codec::{CodecPipeline, DecodedValue};
use serde::Serialize;

use crate::backend::{BackendAdapter, BackendKind};
use crate::browser::{BrowseRequest, KeyBrowser, KeyPage};
use crate::config::{BrowseConfig, Config, PoolConfig};
use crate::error::{Error, Result};
use crate::key::Key;
use crate::pool::{AdapterManager, Pool, PooledAdapter, create_pool, map_pool_error};
use crate::service::{DeleteReport, KeyService};

/// A configured server as listed to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub backend: BackendKind,
}

pub struct Console {
    servers: Vec<ServerInfo>,
    pools: HashMap<String, Pool>,
    browser: KeyBrowser,
    service: KeyService,
    browse_defaults: BrowseConfig,
    pool_config: PoolConfig,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("servers", &self.servers)
            .field("browser", &self.browser)
            .finish_non_exhaustive()
    }
}

impl Console {
    /// Set up one lazy pool per server. No connection is opened here.
    pub fn new(config: &Config) -> Result<Self> {
        let pipeline = config.codec.pipeline()?;
        let mut console = Self {
            servers: Vec::with_capacity(config.servers.len()),
            pools: HashMap::with_capacity(config.servers.len()),
            browser: KeyBrowser::new(config.browse.options()),
            service: KeyService::new(Arc::new(pipeline)),
            browse_defaults: config.browse,
            pool_config: config.pool,
        };

        for server in &config.servers {
            let info = ServerInfo {
                name: server.name.clone(),
                backend: BackendKind::from(&server.backend),
            };
            let pool = create_pool(AdapterManager::new(server.clone()), &config.pool)?;
            console.register(info, pool);
        }

        Ok(console)
    }

    /// Register an already built adapter under `name`, replacing any server
    /// of the same name.
    pub fn attach(&mut self, name: impl Into<String>, adapter: Arc<dyn BackendAdapter>) -> Result<()> {
        let name = name.into();
        let info = ServerInfo {
            name: name.clone(),
            backend: adapter.kind(),
        };
        let pool = create_pool(AdapterManager::shared(name, adapter), &self.pool_config)?;
        self.register(info, pool);
        Ok(())
    }

    fn register(&mut self, info: ServerInfo, pool: Pool) {
        self.servers.retain(|s| s.name != info.name);
        self.pools.insert(info.name.clone(), pool);
        self.servers.push(info);
    }

    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    pub fn pipeline(&self) -> &CodecPipeline {
        self.service.pipeline()
    }

    /// First page with the configured sort and page size.
    pub fn default_request(&self) -> BrowseRequest {
        self.browse_defaults.default_request()
    }

    async fn acquire(&self, server: &str) -> Result<PooledAdapter> {
        let pool = self
            .pools
            .get(server)
            .ok_or_else(|| Error::UnknownServer(server.to_string()))?;
        pool.get().await.map_err(map_pool_error)
    }

    pub async fn browse(&self, server: &str, request: &BrowseRequest) -> Result<KeyPage> {
        let adapter = self.acquire(server).await?;
        self.browser.browse(&**adapter, request).await
    }

    pub async fn read(&self, server: &str, key: &Key) -> Result<DecodedValue> {
        let adapter = self.acquire(server).await?;
        self.service.read_for_display(&**adapter, key).await
    }

    pub async fn save(
        &self,
        server: &str,
        key: &Key,
        text: &str,
        encoder: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let adapter = self.acquire(server).await?;
        self.service.save(&**adapter, key, text, encoder, ttl).await
    }

    /// Byte-level save, for binary values restored with
    /// [`unescape_bytes`](cacheadmin_codec::unescape_bytes).
    pub async fn save_bytes(
        &self,
        server: &str,
        key: &Key,
        value: &[u8],
        encoder: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let adapter = self.acquire(server).await?;
        self.service
            .save_bytes(&**adapter, key, value, encoder, ttl)
            .await
    }

    /// Write back a value from [`read`](Self::read) without losing binary bytes.
    pub async fn save_decoded(
        &self,
        server: &str,
        key: &Key,
        value: &DecodedValue,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let adapter = self.acquire(server).await?;
        self.service.save_decoded(&**adapter, key, value, ttl).await
    }

    pub async fn delete(&self, server: &str, key: &Key) -> Result<bool> {
        let adapter = self.acquire(server).await?;
        self.service.delete_one(&**adapter, key).await
    }

    pub async fn delete_many(&self, server: &str, keys: &[Key]) -> Result<DeleteReport> {
        let adapter = self.acquire(server).await?;
        Ok(self.service.delete_many(&**adapter, keys).await)
    }

    /// Irreversible. Confirmation belongs to the caller.
    pub async fn flush(&self, server: &str) -> Result<()> {
        let adapter = self.acquire(server).await?;
        tracing::info!(server, "flushing all keys");
        self.service.flush(&**adapter).await
    }

    pub async fn health_check(&self, server: &str) -> Result<()> {
        let adapter = self.acquire(server).await?;
        adapter.health_check().await
    }
}
