//! Constants for the cache admin console

/// Default number of keys per page
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Largest page size a request may ask for
pub const MAX_PAGE_SIZE: usize = 1000;

/// Default `COUNT` hint passed to `SCAN`
pub const DEFAULT_SCAN_COUNT: usize = 1000;

/// Hard cap on cursor round trips for one listing
pub const DEFAULT_MAX_SCAN_ITERATIONS: usize = 10_000;

/// Parallel metadata requests issued while building a page
pub const DEFAULT_METADATA_CONCURRENCY: usize = 8;

/// Keys per metadata request
pub const DEFAULT_METADATA_BATCH: usize = 100;

/// Default adapter pool size per server
pub const DEFAULT_POOL_SIZE: usize = 4;

pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Number of logical databases a stock Redis exposes
pub const DEFAULT_REDIS_DATABASES: u32 = 16;

pub const DEFAULT_MEMCACHED_PORT: u16 = 11211;

/// Memcached rejects longer keys
pub const MEMCACHED_MAX_KEY_LENGTH: usize = 250;

/// Memcached reads larger expiration values as a unix timestamp (30 days)
pub const MEMCACHED_MAX_RELATIVE_EXPIRY: u64 = 60 * 60 * 24 * 30;

/// Redis type name reported for RedisJSON documents
pub const REDIS_JSON_TYPE: &str = "ReJSON-RL";

/// Server name used for the Redis server taken from the environment
pub const ENV_SERVER_NAME: &str = "env";

/// Server name used for the Redis server given on the command line
pub const CLI_SERVER_NAME: &str = "cli";
