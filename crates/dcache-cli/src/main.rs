//! dcache CLI
//!
//! Inspect and poke the shared cache from a shell, against whichever backend
//! the configuration selects.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dcache::{Cache, CacheConfig};
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "dcache")]
#[command(author, version, about = "Inspect and modify dcache state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (toml, yaml or json); DCACHE__* variables override it
    #[arg(short, long, global = true, env = "DCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace tag, overriding the configured one
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a value as text
    Get { key: String },

    /// Store a text value
    Set {
        key: String,
        value: String,

        /// Expire after this many seconds
        #[arg(long)]
        ttl: Option<u64>,

        /// Only set if the key does not exist
        #[arg(long)]
        nx: bool,
    },

    /// Delete a key
    Del { key: String },

    /// Count how many of the keys exist
    Exists {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Reset the TTL of a key
    Expire { key: String, seconds: u64 },

    /// Increment a counter
    Incr { key: String },

    /// Decrement an existing counter
    Decr { key: String },

    /// Print one map field
    Hget { key: String, field: String },

    /// Set one map field
    Hset { key: String, field: String, value: String },

    /// Delete one map field
    Hdel { key: String, field: String },

    /// Print every field of a map
    Hgetall { key: String },

    /// Print the map fields matching a pattern
    Hscan {
        key: String,

        #[arg(default_value = "*")]
        pattern: String,
    },

    /// List keys matching a pattern
    Keys {
        #[arg(default_value = "*")]
        pattern: String,
    },

    /// Acquire a lock and hold it until Ctrl-C
    Lock {
        name: String,

        /// Seconds the lock survives without being released
        #[arg(long, default_value_t = 30)]
        hold: u64,

        /// Seconds to wait for the lock
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },

    /// Release a lock
    Unlock { name: String },

    /// Publish a message
    Publish { channel: String, message: String },

    /// Print messages until Ctrl-C
    Subscribe { channel: String },
}

async fn open(cli: &Cli) -> Result<Cache> {
    let mut config =
        CacheConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    debug!("Using namespace {}", config.namespace);

    dcache::connect(&config)
        .await
        .context("Failed to connect to the cache backend")
}

async fn dispatch(cache: &Cache, command: Commands) -> Result<()> {
    match command {
        Commands::Get { key } => commands::kv::get(cache, &key).await,
        Commands::Set { key, value, ttl, nx } => {
            commands::kv::set(cache, &key, &value, ttl, nx).await
        }
        Commands::Del { key } => commands::kv::del(cache, &key).await,
        Commands::Exists { keys } => commands::kv::exists(cache, &keys).await,
        Commands::Expire { key, seconds } => commands::kv::expire(cache, &key, seconds).await,
        Commands::Incr { key } => commands::kv::incr(cache, &key).await,
        Commands::Decr { key } => commands::kv::decr(cache, &key).await,
        Commands::Hget { key, field } => commands::map::hget(cache, &key, &field).await,
        Commands::Hset { key, field, value } => {
            commands::map::hset(cache, &key, &field, &value).await
        }
        Commands::Hdel { key, field } => commands::map::hdel(cache, &key, &field).await,
        Commands::Hgetall { key } => commands::map::hgetall(cache, &key).await,
        Commands::Hscan { key, pattern } => commands::map::hscan(cache, &key, &pattern).await,
        Commands::Keys { pattern } => commands::kv::keys(cache, &pattern).await,
        Commands::Lock { name, hold, timeout } => {
            commands::lock::hold(cache, &name, hold, timeout).await
        }
        Commands::Unlock { name } => commands::lock::release(cache, &name).await,
        Commands::Publish { channel, message } => {
            commands::pubsub::publish(cache, &channel, &message).await
        }
        Commands::Subscribe { channel } => commands::pubsub::subscribe(cache, &channel).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "dcache=debug,dcache_cli=debug,dcache_adapters=debug,dcache_core=debug"
        } else {
            "dcache_cli=info,dcache_adapters=warn"
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let result = match open(&cli).await {
        Ok(cache) => {
            let result = dispatch(&cache, cli.command).await;
            if let Err(e) = cache.close().await {
                debug!("Failed to close cache: {}", e);
            }
            result
        }
        Err(e) => Err(e),
    };

    if let Err(ref e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
