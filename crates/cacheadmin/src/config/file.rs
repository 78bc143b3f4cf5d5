//! TOML configuration file loading

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::builder::ConfigBuilder;
use super::server::{MemcachedConfig, MemoryConfig, RedisConfig, ServerConfig};
use crate::Result;
use crate::browser::{SortField, SortOrder};

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./cacheadmin.toml",
    "~/.config/cacheadmin/config.toml",
    "/etc/cacheadmin/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_into(&content, builder).map_err(|e| match e {
        crate::Error::Config(msg) => {
            crate::Error::Config(format!("Invalid config file {}: {}", path.display(), msg))
        }
        other => other,
    })
}

fn parse_into(content: &str, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let file_config: FileConfig = toml::from_str(content)
        .map_err(|e| crate::Error::Config(format!("Failed to parse: {e}")))?;
    apply_file_config(builder, file_config)
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> Result<ConfigBuilder> {
    // Servers, in file order per backend
    for (index, table) in config.redis.into_iter().enumerate() {
        let name = table.name.clone().unwrap_or_else(|| format!("redis-{index}"));
        builder = builder.server(ServerConfig::redis(name, table.into_config()?));
    }

    for (index, table) in config.memcached.into_iter().enumerate() {
        let name = table
            .name
            .clone()
            .unwrap_or_else(|| format!("memcached-{index}"));
        builder = builder.server(ServerConfig::memcached(name, table.into_config()));
    }

    for (index, table) in config.memory.into_iter().enumerate() {
        let name = table
            .name
            .clone()
            .unwrap_or_else(|| format!("memory-{index}"));
        let memory = MemoryConfig {
            max_entries: table.max_entries,
            max_value_size: table.max_value_size,
        };
        builder = builder.server(ServerConfig::memory(name, memory));
    }

    // Browse settings
    if let Some(browse) = config.browse {
        if let Some(size) = browse.page_size {
            builder = builder.page_size(size);
        }

        if browse.sort.is_some() || browse.order.is_some() {
            let field = browse
                .sort
                .as_deref()
                .map(str::parse::<SortField>)
                .transpose()
                .map_err(|e| crate::Error::Config(e.to_string()))?
                .unwrap_or_default();
            let order = browse
                .order
                .as_deref()
                .map(str::parse::<SortOrder>)
                .transpose()
                .map_err(|e| crate::Error::Config(e.to_string()))?
                .unwrap_or_default();
            builder = builder.sort(field, order);
        }

        if let Some(iterations) = browse.max_scan_iterations {
            builder = builder.max_scan_iterations(iterations);
        }

        if let Some(concurrency) = browse.metadata_concurrency {
            builder = builder.metadata_concurrency(concurrency);
        }

        if let Some(batch) = browse.metadata_batch {
            builder = builder.metadata_batch(batch);
        }
    }

    // Codec settings
    if let Some(codec) = config.codec {
        if let Some(encoders) = codec.encoders {
            builder = builder.encoders(encoders);
        }

        if let Some(formatters) = codec.formatters {
            builder = builder.formatters(formatters);
        }

        if let Some(enabled) = codec.format_undecoded {
            builder = builder.format_undecoded(enabled);
        }
    }

    // Logging settings
    if let Some(logging) = config.logging {
        if let Some(level) = logging.level {
            builder = builder.log_level(level);
        }

        if let Some(json) = logging.json {
            builder = builder.json_logs(json);
        }
    }

    // Pool settings
    if let Some(pool) = config.pool {
        if let Some(size) = pool.max_size
            && let Some(nz) = NonZeroUsize::new(size)
        {
            builder = builder.pool_size(nz);
        }

        if let Some(secs) = pool.wait_timeout_secs {
            let timeout = (secs > 0).then(|| Duration::from_secs(secs));
            builder = builder.pool_wait_timeout(timeout);
        }
    }

    Ok(builder)
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    redis: Vec<RedisTable>,
    #[serde(default)]
    memcached: Vec<MemcachedTable>,
    #[serde(default)]
    memory: Vec<MemoryTable>,
    browse: Option<BrowseFileConfig>,
    codec: Option<CodecFileConfig>,
    logging: Option<LoggingFileConfig>,
    pool: Option<PoolFileConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RedisTable {
    name: Option<String>,
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<PathBuf>,
    scheme: Option<String>,
    tls_insecure: Option<bool>,
    ca_file: Option<PathBuf>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    database: Option<u32>,
    username: Option<String>,
    password: Option<String>,
    authfile: Option<PathBuf>,
    databases: Option<u32>,
    scansize: Option<usize>,
    keys_command: Option<bool>,
    nodes: Option<Vec<String>>,
}

impl RedisTable {
    fn into_config(self) -> Result<RedisConfig> {
        let mut config = match self.url {
            Some(url_str) => {
                let url = Url::parse(&url_str)
                    .map_err(|e| crate::Error::Config(format!("Invalid Redis URL: {e}")))?;
                RedisConfig::from_url(&url)?
            }
            None => RedisConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.path.is_some() {
            config.path = self.path;
        }
        match self.scheme.as_deref() {
            None => {}
            Some("tls") => config.tls = true,
            Some("tcp") => config.tls = false,
            Some(other) => {
                return Err(crate::Error::Config(format!(
                    "Unsupported Redis scheme: {other}"
                )));
            }
        }
        if let Some(insecure) = self.tls_insecure {
            config.tls_insecure = insecure;
        }
        if self.ca_file.is_some() {
            config.ca_file = self.ca_file;
        }
        if self.cert_file.is_some() {
            config.cert_file = self.cert_file;
        }
        if self.key_file.is_some() {
            config.key_file = self.key_file;
        }
        if let Some(database) = self.database {
            config.database = database;
        }
        if self.username.is_some() {
            config.username = self.username;
        }
        if self.password.is_some() {
            config.password = self.password;
        }
        config.authfile = self.authfile;
        if let Some(databases) = self.databases {
            config.databases = databases;
        }
        if let Some(scansize) = self.scansize {
            config.scansize = scansize;
        }
        if let Some(keys_command) = self.keys_command {
            config.keys_command = keys_command;
        }
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemcachedTable {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<PathBuf>,
}

impl MemcachedTable {
    fn into_config(self) -> MemcachedConfig {
        let defaults = MemcachedConfig::default();
        MemcachedConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            path: self.path,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryTable {
    name: Option<String>,
    max_entries: Option<usize>,
    max_value_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BrowseFileConfig {
    page_size: Option<usize>,
    sort: Option<String>,
    order: Option<String>,
    max_scan_iterations: Option<usize>,
    metadata_concurrency: Option<usize>,
    metadata_batch: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CodecFileConfig {
    encoders: Option<Vec<String>>,
    formatters: Option<Vec<String>>,
    format_undecoded: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingFileConfig {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolFileConfig {
    max_size: Option<usize>,
    wait_timeout_secs: Option<u64>,
}
