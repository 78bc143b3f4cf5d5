//! Per-server connection descriptors

use std::path::PathBuf;

use url::Url;

use crate::constants::{
    DEFAULT_MEMCACHED_PORT, DEFAULT_REDIS_DATABASES, DEFAULT_REDIS_PORT, DEFAULT_SCAN_COUNT,
};
use crate::error::{Error, Result};

/// One configured backend instance. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub backend: BackendConfig,
}

impl ServerConfig {
    pub fn redis(name: impl Into<String>, config: RedisConfig) -> Self {
        Self {
            name: name.into(),
            backend: BackendConfig::Redis(config),
        }
    }

    pub fn memcached(name: impl Into<String>, config: MemcachedConfig) -> Self {
        Self {
            name: name.into(),
            backend: BackendConfig::Memcached(config),
        }
    }

    pub fn memory(name: impl Into<String>, config: MemoryConfig) -> Self {
        Self {
            name: name.into(),
            backend: BackendConfig::Memory(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Redis(RedisConfig),
    Memcached(MemcachedConfig),
    Memory(MemoryConfig),
}

/// Redis connection descriptor.
///
/// `path` selects a unix socket and wins over `host`/`port`. A non-empty
/// `nodes` list switches to cluster mode and ignores `host`/`port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub path: Option<PathBuf>,
    pub tls: bool,
    /// Skip certificate verification
    pub tls_insecure: bool,
    /// PEM bundle of trusted roots, replacing the system store
    pub ca_file: Option<PathBuf>,
    /// PEM client certificate; needs `key_file`
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub database: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    /// File holding the password, read when connecting
    pub authfile: Option<PathBuf>,
    /// Number of logical databases on the server
    pub databases: u32,
    /// `COUNT` hint for `SCAN`
    pub scansize: usize,
    /// List keys with `KEYS` instead of `SCAN`
    pub keys_command: bool,
    /// Cluster seed nodes as `host:port`
    pub nodes: Vec<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_REDIS_PORT,
            path: None,
            tls: false,
            tls_insecure: false,
            ca_file: None,
            cert_file: None,
            key_file: None,
            database: 0,
            username: None,
            password: None,
            authfile: None,
            databases: DEFAULT_REDIS_DATABASES,
            scansize: DEFAULT_SCAN_COUNT,
            keys_command: false,
            nodes: Vec::new(),
        }
    }
}

impl RedisConfig {
    /// Build from a `redis://`, `rediss://` or `redis+unix://` URL.
    ///
    /// `rediss://` URLs may carry `ca_file`, `cert_file` and `key_file` query
    /// parameters.
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut config = Self::default();
        match url.scheme() {
            "redis" | "rediss" => {
                config.tls = url.scheme() == "rediss";
                if let Some(host) = url.host_str() {
                    config.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
                }
                config.port = url.port().unwrap_or(DEFAULT_REDIS_PORT);
                let db = url.path().trim_start_matches('/');
                if !db.is_empty() {
                    config.database = db
                        .parse()
                        .map_err(|_| Error::Config(format!("Invalid database in URL: {db}")))?;
                }
                config.tls_insecure = url.fragment() == Some("insecure");
                for (name, value) in url.query_pairs() {
                    let path = Some(PathBuf::from(value.as_ref()));
                    match name.as_ref() {
                        "ca_file" => config.ca_file = path,
                        "cert_file" => config.cert_file = path,
                        "key_file" => config.key_file = path,
                        _ => {}
                    }
                }
            }
            "redis+unix" | "unix" => {
                config.path = Some(PathBuf::from(url.path()));
                for (name, value) in url.query_pairs() {
                    if name == "db" {
                        config.database = value.parse().map_err(|_| {
                            Error::Config(format!("Invalid database in URL: {value}"))
                        })?;
                    }
                }
            }
            other => {
                return Err(Error::Config(format!("Unsupported Redis URL scheme: {other}")));
            }
        }

        if !url.username().is_empty() {
            config.username = Some(decode_userinfo(url.username()));
        }
        config.password = url.password().map(decode_userinfo);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database >= self.databases {
            return Err(Error::Config(format!(
                "Database {} is out of range, server has {} databases",
                self.database, self.databases
            )));
        }
        if !self.nodes.is_empty() && self.database != 0 {
            return Err(Error::Config(
                "Redis Cluster only supports database 0".to_string(),
            ));
        }
        if self.scansize == 0 {
            return Err(Error::Config("scansize must be positive".to_string()));
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(Error::Config(
                "cert_file and key_file must be set together".to_string(),
            ));
        }
        if !self.tls && (self.ca_file.is_some() || self.cert_file.is_some()) {
            return Err(Error::Config(
                "TLS certificate files require a tls connection".to_string(),
            ));
        }
        Ok(())
    }

    /// Contents of the configured certificate files, read when connecting.
    ///
    /// `None` when no file is configured, so the system roots apply.
    pub fn tls_material(&self) -> Result<Option<TlsMaterial>> {
        if self.ca_file.is_none() && self.cert_file.is_none() {
            return Ok(None);
        }

        let root_cert = self.ca_file.as_deref().map(read_pem).transpose()?;
        let client_identity = match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
            _ => None,
        };
        Ok(Some(TlsMaterial {
            root_cert,
            client_identity,
        }))
    }

    /// Password from `authfile` if set, otherwise `password`.
    pub fn resolve_password(&self) -> Result<Option<String>> {
        match &self.authfile {
            Some(path) => std::fs::read_to_string(path)
                .map(|content| Some(content.trim().to_string()))
                .map_err(|e| {
                    Error::Config(format!("Failed to read authfile {}: {e}", path.display()))
                }),
            None => Ok(self.password.clone()),
        }
    }

    /// Connection URL for the standalone server.
    pub fn connection_url(&self) -> Result<Url> {
        let password = self.resolve_password()?;

        if let Some(path) = &self.path {
            let mut url = Url::parse("redis+unix:///")
                .map_err(|e| Error::Config(format!("Invalid socket URL: {e}")))?;
            url.set_path(&path.to_string_lossy());
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("db", &self.database.to_string());
                if let Some(user) = &self.username {
                    query.append_pair("user", user);
                }
                if let Some(pass) = &password {
                    query.append_pair("pass", pass);
                }
            }
            return Ok(url);
        }

        let mut url = self.base_url(&self.host, self.port, password.as_deref())?;
        url.set_path(&format!("/{}", self.database));
        Ok(url)
    }

    /// Connection URLs for the cluster seed nodes.
    pub fn node_urls(&self) -> Result<Vec<Url>> {
        let password = self.resolve_password()?;
        self.nodes
            .iter()
            .map(|node| {
                let (host, port) = split_host_port(node)?;
                self.base_url(host, port, password.as_deref())
            })
            .collect()
    }

    /// Connection URL for one cluster node given as `host:port`.
    pub fn node_url(&self, node: &str) -> Result<Url> {
        let password = self.resolve_password()?;
        let (host, port) = split_host_port(node)?;
        self.base_url(host, port, password.as_deref())
    }

    fn base_url(&self, host: &str, port: u16, password: Option<&str>) -> Result<Url> {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };

        let mut url = Url::parse(&format!("{scheme}://{host}"))
            .map_err(|e| Error::Config(format!("Invalid Redis host {host}: {e}")))?;
        url.set_port(Some(port))
            .map_err(|()| Error::Config("Failed to set port in URL".into()))?;
        if let Some(user) = &self.username {
            url.set_username(user)
                .map_err(|()| Error::Config("Failed to set username in URL".into()))?;
        }
        if let Some(pass) = password {
            url.set_password(Some(pass))
                .map_err(|()| Error::Config("Failed to set password in URL".into()))?;
        }
        if self.tls && self.tls_insecure {
            url.set_fragment(Some("insecure"));
        }
        Ok(url)
    }
}

/// PEM bytes for a TLS connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub root_cert: Option<Vec<u8>>,
    /// Client certificate and private key
    pub client_identity: Option<(Vec<u8>, Vec<u8>)>,
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("Failed to read TLS file {}: {e}", path.display())))
}

fn decode_userinfo(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), std::borrow::Cow::into_owned)
}

fn split_host_port(node: &str) -> Result<(&str, u16)> {
    let (host, port) = node
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("Cluster node must be host:port, got {node}")))?;
    let port = port
        .parse()
        .map_err(|_| Error::Config(format!("Invalid port in cluster node {node}")))?;
    Ok((host.trim_start_matches('[').trim_end_matches(']'), port))
}

/// Memcached connection descriptor. `path` selects a unix socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcachedConfig {
    pub host: String,
    pub port: u16,
    pub path: Option<PathBuf>,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_MEMCACHED_PORT,
            path: None,
        }
    }
}

impl MemcachedConfig {
    /// Client address as `tcp://host:port` or `unix:///path`.
    pub fn dsn(&self) -> String {
        match &self.path {
            Some(path) => format!("unix://{}", path.display()),
            None if self.host.contains(':') && !self.host.starts_with('[') => {
                format!("tcp://[{}]:{}", self.host, self.port)
            }
            None => format!("tcp://{}:{}", self.host, self.port),
        }
    }
}

/// In-process store limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryConfig {
    pub max_entries: Option<usize>,
    pub max_value_size: Option<usize>,
}
