use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use cacheadmin::config::{self, ConfigBuilder};
use cacheadmin::observability::init_logging;
use cacheadmin::{
    BrowseRequest, CLI_SERVER_NAME, Console, Key, RedisConfig, ServerConfig, SortField, SortOrder,
    unescape_bytes,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "cacheadmin")]
#[command(about = "Browse and edit Redis, Memcached and in-process cache entries", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Redis URL added as server "cli" (redis://, rediss://, redis+unix://)
    #[arg(short, long)]
    url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured servers
    Servers,

    /// Check that a server answers
    Ping { server: String },

    /// List one page of keys
    Browse {
        server: String,

        /// Glob pattern (*, ?, [a-z])
        #[arg(short, long)]
        pattern: Option<String>,

        /// Sort field (key, ttl, size)
        #[arg(short, long)]
        sort: Option<SortField>,

        /// Sort order (asc, desc)
        #[arg(short, long)]
        order: Option<SortOrder>,

        /// Zero-based page index
        #[arg(long, default_value = "0")]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Show a decoded value
    Get { server: String, key: String },

    /// Store a value
    Set {
        server: String,
        key: String,
        value: String,

        /// Codec to encode with, usually the one reported by `get`
        #[arg(short, long)]
        encoder: Option<String>,

        /// Expiry in seconds
        #[arg(short, long)]
        ttl: Option<u64>,

        /// Value is escaped binary text as printed by `get` (`\\`, `\xNN`)
        #[arg(short, long)]
        binary: bool,
    },

    /// Delete one or more keys
    Delete {
        server: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Remove every key on a server
    Flush {
        server: String,

        /// Confirm the flush
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Command line values sit under file and environment: env > file > CLI > defaults
    let mut cli = ConfigBuilder::new().json_logs(args.json_logs);
    if let Some(ref url_str) = args.url {
        let url = Url::parse(url_str).map_err(|e| anyhow::anyhow!("Invalid Redis URL: {e}"))?;
        cli = cli.server(ServerConfig::redis(
            CLI_SERVER_NAME,
            RedisConfig::from_url(&url)?,
        ));
    }
    if args.verbose {
        cli = cli.log_level("debug");
    }

    let builder = if let Some(ref path) = args.config {
        config::load_config_from_path_with(path, cli)?
    } else {
        config::load_config_with(cli)?
    };
    let config = builder.build()?;

    init_logging(&config.logging)?;
    tracing::debug!(servers = config.servers.len(), "configuration loaded");

    let console = Console::new(&config)?;
    run(&console, args.command).await
}

async fn run(console: &Console, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Servers => print_json(&console.servers()),
        Command::Ping { server } => {
            console.health_check(&server).await?;
            print_json(&serde_json::json!({ "server": server, "ok": true }))
        }
        Command::Browse {
            server,
            pattern,
            sort,
            order,
            page,
            page_size,
        } => {
            let defaults = console.default_request();
            let request = BrowseRequest {
                pattern,
                sort: sort.unwrap_or(defaults.sort),
                order: order.unwrap_or(defaults.order),
                page,
                page_size: page_size.unwrap_or(defaults.page_size),
            };
            print_json(&console.browse(&server, &request).await?)
        }
        Command::Get { server, key } => {
            print_json(&console.read(&server, &Key::from(key)).await?)
        }
        Command::Set {
            server,
            key,
            value,
            encoder,
            ttl,
            binary,
        } => {
            let key = Key::from(key);
            let bytes = if binary {
                unescape_bytes(&value)?
            } else {
                value.into_bytes()
            };
            console
                .save_bytes(
                    &server,
                    &key,
                    &bytes,
                    encoder.as_deref(),
                    ttl.map(Duration::from_secs),
                )
                .await?;
            print_json(&serde_json::json!({ "key": key, "saved": true }))
        }
        Command::Delete { server, keys } => {
            let keys: Vec<Key> = keys.into_iter().map(Key::from).collect();
            let report = console.delete_many(&server, &keys).await?;
            print_json(&report)
        }
        Command::Flush { server, yes } => {
            if !yes {
                anyhow::bail!("flush removes every key on {server}; pass --yes to confirm");
            }
            console
                .flush(&server)
                .await
                .with_context(|| format!("Failed to flush {server}"))?;
            print_json(&serde_json::json!({ "server": server, "flushed": true }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
