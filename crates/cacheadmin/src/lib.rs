//! Operator console core for cache backends.
//!
//! Browse, read, edit and delete entries in Redis, Memcached and in-process
//! stores through one [`BackendAdapter`] interface. Stored values pass
//! through a [`CodecPipeline`] so compressed payloads are shown as text and
//! written back in the same encoding.
//!
//! ```no_run
//! use cacheadmin::{BrowseRequest, Config, Console, Key, MemoryConfig, ServerConfig};
//!
//! # async fn run() -> cacheadmin::Result<()> {
//! let config = Config::builder()
//!     .server(ServerConfig::memory("local", MemoryConfig::default()))
//!     .build()?;
//! let console = Console::new(&config)?;
//!
//! console.save("local", &Key::from("user:1"), "alice", Some("gzcompress"), None).await?;
//! let page = console.browse("local", &BrowseRequest::default().pattern("user:*")).await?;
//! assert_eq!(page.total_count, 1);
//!
//! let value = console.read("local", &Key::from("user:1")).await?;
//! assert_eq!(value.matched_encoder.as_deref(), Some("gzcompress"));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod browser;
pub mod config;
pub mod console;
mod constants;
mod error;
pub mod key;
pub mod observability;
pub mod pattern;
pub mod pool;
pub mod service;

pub use backend::{
    BackendAdapter, BackendKind, EnumerationStrategy, KeyBatch, MemcachedAdapter, MemoryStore,
    RedisAdapter, TracedAdapter, connect_adapter,
};
pub use browser::{BrowseOptions, BrowseRequest, KeyBrowser, KeyPage, SortField, SortOrder};
pub use cacheadmin_codec::{
    CodecPipeline, CodecRule, DecodedValue, FormatterRule, NO_ENCODER, unescape_bytes,
};
pub use config::{
    BackendConfig, BrowseConfig, CodecConfig, Config, ConfigBuilder, LoggingConfig,
    MemcachedConfig, MemoryConfig, PoolConfig, RedisConfig, ServerConfig,
};
pub use console::{Console, ServerInfo};
pub use constants::{CLI_SERVER_NAME, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use error::{Error, Result};
pub use key::{Key, KeySummary, KeyType, Ttl};
pub use pattern::Pattern;
pub use service::{DeleteReport, KeyService};
