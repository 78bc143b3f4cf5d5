//! Configuration management
//!
//! Supports configuration loading with precedence: env > file > CLI > defaults

mod builder;
mod env;
mod file;
mod server;

pub use builder::{BrowseConfig, CodecConfig, Config, ConfigBuilder, LoggingConfig, PoolConfig};
pub use server::{
    BackendConfig, MemcachedConfig, MemoryConfig, RedisConfig, ServerConfig, TlsMaterial,
};

use crate::Result;

/// Load configuration with precedence: env > file > defaults
pub fn load_config() -> Result<ConfigBuilder> {
    load_config_with(ConfigBuilder::new())
}

/// Like [`load_config`], layered over `builder` (command line values)
pub fn load_config_with(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    // Load from config file if exists
    if let Some(path) = file::find_config_file() {
        tracing::info!("Loading configuration from {}", path.display());
        builder = file::load_from_file(&path, builder)?;
    }

    // Override with environment variables
    env::load_from_env(builder)
}

/// Load configuration from a specific file path
pub fn load_config_from_path(path: &std::path::Path) -> Result<ConfigBuilder> {
    load_config_from_path_with(path, ConfigBuilder::new())
}

/// Like [`load_config_from_path`], layered over `builder`
pub fn load_config_from_path_with(
    path: &std::path::Path,
    builder: ConfigBuilder,
) -> Result<ConfigBuilder> {
    // Load from specified file
    let builder = file::load_from_file(path, builder)?;

    // Override with environment variables
    env::load_from_env(builder)
}
