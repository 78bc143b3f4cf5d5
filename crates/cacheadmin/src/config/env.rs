//! Environment variable loading for configuration

use std::env;

use url::Url;

use super::builder::ConfigBuilder;
use super::server::{RedisConfig, ServerConfig};
use crate::Result;
use crate::browser::{SortField, SortOrder};
use crate::constants::ENV_SERVER_NAME;

/// Environment variable names
mod vars {
    pub const CACHEADMIN_REDIS_URL: &str = "CACHEADMIN_REDIS_URL";
    pub const CACHEADMIN_PAGE_SIZE: &str = "CACHEADMIN_PAGE_SIZE";
    pub const CACHEADMIN_SORT: &str = "CACHEADMIN_SORT";
    pub const CACHEADMIN_ENCODERS: &str = "CACHEADMIN_ENCODERS";
    pub const CACHEADMIN_FORMATTERS: &str = "CACHEADMIN_FORMATTERS";
    pub const CACHEADMIN_LOG_LEVEL: &str = "CACHEADMIN_LOG_LEVEL";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const CACHEADMIN_JSON_LOGS: &str = "CACHEADMIN_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    // Redis server
    if let Ok(url_str) = env::var(vars::CACHEADMIN_REDIS_URL) {
        let url = Url::parse(&url_str).map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::CACHEADMIN_REDIS_URL, e))
        })?;
        let redis = RedisConfig::from_url(&url)?;
        redis.validate()?;
        builder = builder.server(ServerConfig::redis(ENV_SERVER_NAME, redis));
    }

    // Page size
    if let Ok(size_str) = env::var(vars::CACHEADMIN_PAGE_SIZE)
        && let Ok(size) = size_str.parse::<usize>()
    {
        builder = builder.page_size(size);
    }

    // Sort, as "field" or "field:order"
    if let Ok(sort) = env::var(vars::CACHEADMIN_SORT) {
        let (field, order) = sort.split_once(':').unwrap_or((sort.as_str(), "asc"));
        if let Ok(field) = field.trim().parse::<SortField>()
            && let Ok(order) = order.trim().parse::<SortOrder>()
        {
            builder = builder.sort(field, order);
        }
    }

    // Codec chains
    if let Ok(names) = env::var(vars::CACHEADMIN_ENCODERS) {
        builder = builder.encoders(parse_list(&names));
    }

    if let Ok(names) = env::var(vars::CACHEADMIN_FORMATTERS) {
        builder = builder.formatters(parse_list(&names));
    }

    // Logging
    if let Ok(level) = env::var(vars::CACHEADMIN_LOG_LEVEL) {
        builder = builder.log_level(level);
    } else if let Ok(level) = env::var(vars::RUST_LOG) {
        builder = builder.log_level(level);
    }

    if let Ok(val) = env::var(vars::CACHEADMIN_JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{BackendConfig, MemoryConfig};

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        vars::CACHEADMIN_REDIS_URL,
        vars::CACHEADMIN_PAGE_SIZE,
        vars::CACHEADMIN_SORT,
        vars::CACHEADMIN_ENCODERS,
        vars::CACHEADMIN_FORMATTERS,
        vars::CACHEADMIN_LOG_LEVEL,
        vars::RUST_LOG,
        vars::CACHEADMIN_JSON_LOGS,
    ];

    fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_MUTEX.lock().unwrap();

        let old_values: Vec<_> = ALL_VARS.iter().map(|k| (*k, env::var(k).ok())).collect();

        for key in ALL_VARS {
            // SAFETY: We hold a mutex lock to ensure no concurrent modifications
            unsafe { env::remove_var(key) };
        }
        for (key, value) in vars {
            // SAFETY: We hold a mutex lock to ensure no concurrent modifications
            unsafe { env::set_var(key, value) };
        }

        let result = f();

        for (key, old_value) in old_values {
            match old_value {
                // SAFETY: We hold a mutex lock to ensure no concurrent modifications
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    fn base() -> ConfigBuilder {
        ConfigBuilder::new().server(ServerConfig::memory("local", MemoryConfig::default()))
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("gzcompress, gzencode,,"), ["gzcompress", "gzencode"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_load_redis_url() {
        with_env_vars(&[("CACHEADMIN_REDIS_URL", "redis://localhost:6380/3")], || {
            let config = load_from_env(ConfigBuilder::new()).unwrap().build().unwrap();
            let server = config.server(ENV_SERVER_NAME).unwrap();
            let BackendConfig::Redis(redis) = &server.backend else {
                panic!("expected redis");
            };
            assert_eq!(redis.host, "localhost");
            assert_eq!(redis.port, 6380);
            assert_eq!(redis.database, 3);
        });
    }

    #[test]
    fn test_load_invalid_url() {
        with_env_vars(&[("CACHEADMIN_REDIS_URL", "not a url")], || {
            let err = load_from_env(ConfigBuilder::new()).unwrap_err();
            assert!(err.is_config());
        });
    }

    #[test]
    fn test_load_page_size_and_sort() {
        with_env_vars(
            &[("CACHEADMIN_PAGE_SIZE", "40"), ("CACHEADMIN_SORT", "ttl:desc")],
            || {
                let config = load_from_env(base()).unwrap().build().unwrap();
                assert_eq!(config.browse.page_size, 40);
                assert_eq!(config.browse.sort, SortField::Ttl);
                assert_eq!(config.browse.order, SortOrder::Desc);
            },
        );
    }

    #[test]
    fn test_invalid_values_ignored() {
        with_env_vars(
            &[("CACHEADMIN_PAGE_SIZE", "many"), ("CACHEADMIN_SORT", "weight")],
            || {
                let config = load_from_env(base()).unwrap().build().unwrap();
                assert_eq!(config.browse.page_size, crate::constants::DEFAULT_PAGE_SIZE);
                assert_eq!(config.browse.sort, SortField::Key);
            },
        );
    }

    #[test]
    fn test_load_codec_lists() {
        with_env_vars(
            &[
                ("CACHEADMIN_ENCODERS", "gzencode"),
                ("CACHEADMIN_FORMATTERS", ""),
            ],
            || {
                let config = load_from_env(base()).unwrap().build().unwrap();
                assert_eq!(config.codec.encoders, Some(vec!["gzencode".to_string()]));
                assert_eq!(config.codec.formatters, Some(Vec::new()));
            },
        );
    }

    #[test]
    fn test_log_level_precedence() {
        with_env_vars(
            &[("CACHEADMIN_LOG_LEVEL", "warn"), ("RUST_LOG", "trace")],
            || {
                let config = load_from_env(base()).unwrap().build().unwrap();
                assert_eq!(config.logging.level, "warn");
            },
        );

        with_env_vars(
            &[("RUST_LOG", "debug"), ("CACHEADMIN_JSON_LOGS", "yes")],
            || {
                let config = load_from_env(base()).unwrap().build().unwrap();
                assert_eq!(config.logging.level, "debug");
                assert!(config.logging.json);
            },
        );
    }

    #[test]
    fn test_load_no_env_vars() {
        with_env_vars(&[], || {
            let config = load_from_env(base()).unwrap().build().unwrap();
            assert_eq!(config.servers.len(), 1);
            assert_eq!(config.logging.level, "info");
        });
    }
}
