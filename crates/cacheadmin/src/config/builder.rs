//! Configuration builder

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use cacheadmin_codec::{CodecPipeline, DEFAULT_CODECS, DEFAULT_FORMATTERS};

use super::server::ServerConfig;
use crate::browser::{BrowseOptions, BrowseRequest, SortField, SortOrder};
use crate::constants::{
    DEFAULT_MAX_SCAN_ITERATIONS, DEFAULT_METADATA_BATCH, DEFAULT_METADATA_CONCURRENCY,
    DEFAULT_PAGE_SIZE, DEFAULT_POOL_SIZE, MAX_PAGE_SIZE,
};
use crate::error::{Error, Result};

/// Console configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    pub browse: BrowseConfig,
    pub codec: CodecConfig,
    pub logging: LoggingConfig,
    pub pool: PoolConfig,
}

impl Config {
    #[must_use]
    pub const fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }
}

/// Listing defaults and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseConfig {
    pub page_size: usize,
    pub sort: SortField,
    pub order: SortOrder,
    pub max_scan_iterations: usize,
    pub metadata_concurrency: usize,
    pub metadata_batch: usize,
}

impl BrowseConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            sort: SortField::Key,
            order: SortOrder::Asc,
            max_scan_iterations: DEFAULT_MAX_SCAN_ITERATIONS,
            metadata_concurrency: DEFAULT_METADATA_CONCURRENCY,
            metadata_batch: DEFAULT_METADATA_BATCH,
        }
    }

    #[must_use]
    pub const fn options(&self) -> BrowseOptions {
        BrowseOptions {
            max_scan_iterations: self.max_scan_iterations,
            metadata_concurrency: self.metadata_concurrency,
            metadata_batch: self.metadata_batch,
        }
    }

    /// First page with the configured sort and size.
    #[must_use]
    pub fn default_request(&self) -> BrowseRequest {
        BrowseRequest::default()
            .sort(self.sort, self.order)
            .page(0, self.page_size)
    }
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Codec and formatter chains by built-in rule name.
///
/// `None` keeps the default chain; an empty list disables it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecConfig {
    pub encoders: Option<Vec<String>>,
    pub formatters: Option<Vec<String>>,
    pub format_undecoded: bool,
}

impl CodecConfig {
    pub fn pipeline(&self) -> Result<CodecPipeline> {
        let builder = match &self.encoders {
            Some(names) => CodecPipeline::builder().builtin_codecs(names.as_slice())?,
            None => CodecPipeline::builder().builtin_codecs(DEFAULT_CODECS)?,
        };
        let builder = match &self.formatters {
            Some(names) => builder.builtin_formatters(names.as_slice())?,
            None => builder.builtin_formatters(DEFAULT_FORMATTERS)?,
        };
        Ok(builder.format_undecoded(self.format_undecoded).build())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Per-server adapter pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: NonZeroUsize,
    pub wait_timeout: Option<Duration>,
}

impl PoolConfig {
    const DEFAULT_MAX_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(DEFAULT_POOL_SIZE - 1);

    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_size: Self::DEFAULT_MAX_SIZE,
            wait_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration builder with fluent API
#[derive(Debug)]
pub struct ConfigBuilder {
    servers: Vec<ServerConfig>,
    browse: BrowseConfig,
    codec: CodecConfig,
    logging: LoggingConfig,
    pool: PoolConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            servers: Vec::new(),
            browse: BrowseConfig::new(),
            codec: CodecConfig {
                encoders: None,
                formatters: None,
                format_undecoded: false,
            },
            logging: LoggingConfig {
                level: String::new(),
                json: false,
            },
            pool: PoolConfig::new(),
        }
    }

    /// Add a server. A server with the same name is replaced.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        if let Some(existing) = self.servers.iter_mut().find(|s| s.name == server.name) {
            *existing = server;
        } else {
            self.servers.push(server);
        }
        self
    }

    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.browse.page_size = size;
        self
    }

    #[must_use]
    pub const fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.browse.sort = field;
        self.browse.order = order;
        self
    }

    #[must_use]
    pub const fn max_scan_iterations(mut self, iterations: usize) -> Self {
        self.browse.max_scan_iterations = iterations;
        self
    }

    #[must_use]
    pub const fn metadata_concurrency(mut self, concurrency: usize) -> Self {
        self.browse.metadata_concurrency = concurrency;
        self
    }

    #[must_use]
    pub const fn metadata_batch(mut self, batch: usize) -> Self {
        self.browse.metadata_batch = batch;
        self
    }

    #[must_use]
    pub fn encoders(mut self, names: Vec<String>) -> Self {
        self.codec.encoders = Some(names);
        self
    }

    #[must_use]
    pub fn formatters(mut self, names: Vec<String>) -> Self {
        self.codec.formatters = Some(names);
        self
    }

    #[must_use]
    pub const fn format_undecoded(mut self, enabled: bool) -> Self {
        self.codec.format_undecoded = enabled;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, json: bool) -> Self {
        self.logging.json = json;
        self
    }

    #[must_use]
    pub const fn pool_size(mut self, size: NonZeroUsize) -> Self {
        self.pool.max_size = size;
        self
    }

    #[must_use]
    pub const fn pool_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool.wait_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.servers.is_empty() {
            return Err(Error::Config("At least one server is required".into()));
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(Error::Config("Server name must not be empty".into()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate server name: {}",
                    server.name
                )));
            }
        }

        if self.browse.page_size == 0 || self.browse.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if self.browse.max_scan_iterations == 0 {
            return Err(Error::Config("max_scan_iterations must be positive".into()));
        }

        self.codec
            .pipeline()
            .map_err(|e| Error::Config(format!("Invalid codec configuration: {e}")))?;

        let logging = LoggingConfig {
            level: if self.logging.level.is_empty() {
                "info".to_string()
            } else {
                self.logging.level
            },
            json: self.logging.json,
        };

        Ok(Config {
            servers: self.servers,
            browse: self.browse,
            codec: self.codec,
            logging,
            pool: self.pool,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, RedisConfig};

    fn memory(name: &str) -> ServerConfig {
        ServerConfig::memory(name, MemoryConfig::default())
    }

    #[test]
    fn test_build_defaults() {
        let config = ConfigBuilder::new().server(memory("local")).build().unwrap();

        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.browse.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.browse.sort, SortField::Key);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.pool.max_size.get(), DEFAULT_POOL_SIZE);
        assert_eq!(config.codec, CodecConfig::default());
    }

    #[test]
    fn test_build_requires_server() {
        let err = ConfigBuilder::new().build().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_same_name_replaces() {
        let config = ConfigBuilder::new()
            .server(memory("a"))
            .server(ServerConfig::redis("a", RedisConfig::default()))
            .build()
            .unwrap();
        assert_eq!(config.servers.len(), 1);
        assert!(matches!(
            config.server("a").unwrap().backend,
            crate::config::BackendConfig::Redis(_)
        ));
    }

    #[test]
    fn test_empty_server_name_rejected() {
        let err = ConfigBuilder::new().server(memory("")).build().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(
            ConfigBuilder::new()
                .server(memory("a"))
                .page_size(0)
                .build()
                .unwrap_err()
                .is_config()
        );
        assert!(
            ConfigBuilder::new()
                .server(memory("a"))
                .page_size(MAX_PAGE_SIZE + 1)
                .build()
                .is_err()
        );
        assert!(
            ConfigBuilder::new()
                .server(memory("a"))
                .page_size(MAX_PAGE_SIZE)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_unknown_encoder_rejected() {
        let err = ConfigBuilder::new()
            .server(memory("a"))
            .encoders(vec!["brotli".to_string()])
            .build()
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("brotli"));
    }

    #[test]
    fn test_codec_pipeline_from_names() {
        let codec = CodecConfig {
            encoders: Some(vec!["gz_magento".to_string(), "gzcompress".to_string()]),
            formatters: Some(Vec::new()),
            format_undecoded: true,
        };
        let pipeline = codec.pipeline().unwrap();
        assert_eq!(
            pipeline.codec_names().collect::<Vec<_>>(),
            ["gz_magento", "gzcompress"]
        );
        assert_eq!(pipeline.formatter_names().count(), 0);

        let defaults = CodecConfig::default().pipeline().unwrap();
        assert_eq!(defaults.codec_names().collect::<Vec<_>>(), DEFAULT_CODECS);
    }

    #[test]
    fn test_default_request() {
        let browse = BrowseConfig {
            page_size: 50,
            sort: SortField::Size,
            order: SortOrder::Desc,
            ..BrowseConfig::new()
        };
        let request = browse.default_request();
        assert_eq!(request.page_size, 50);
        assert_eq!(request.page, 0);
        assert_eq!(request.sort, SortField::Size);
        assert_eq!(request.order, SortOrder::Desc);
        assert!(request.pattern.is_none());
    }
}
