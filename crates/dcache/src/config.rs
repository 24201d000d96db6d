//! Layered configuration and backend wiring
//!
//! Sources, later ones winning: built-in defaults, an optional file (any
//! format the `config` crate detects from the extension), then `DCACHE__*`
//! environment variables with `__` between nested keys, for example
//! `DCACHE__BACKEND__TYPE=sql` or `DCACHE__BACKEND__URL=sqlite://cache.db`.

use std::path::Path;
use std::sync::Arc;

use config::{Config, ConfigBuilder, Environment, File};
use dcache_adapters::{RedisBackend, RedisConfig, SqlBackend, SqlConfig};
use dcache_core::{CacheBackend, CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::DEFAULT_NAMESPACE;
use crate::{registry, Cache};

pub const ENV_PREFIX: &str = "DCACHE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Redis(RedisConfig),
    Sql(SqlConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Redis(RedisConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Application tag prefixed to every key
    pub namespace: String,
    pub backend: BackendConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            backend: BackendConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn load(path: Option<&Path>) -> CacheResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<config::builder::DefaultState>) -> CacheResult<Self> {
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| CacheError::Config(e.to_string()))
    }
}

/// Open the configured backend and wrap it in a [`Cache`]
pub async fn connect(config: &CacheConfig) -> CacheResult<Cache> {
    let backend: Arc<dyn CacheBackend> = match &config.backend {
        BackendConfig::Redis(redis) => Arc::new(RedisBackend::connect(redis).await?),
        BackendConfig::Sql(sql) => Arc::new(SqlBackend::connect(sql).await?),
    };
    info!(
        "Cache ready on {} backend with namespace {}",
        backend.name(),
        config.namespace
    );
    Ok(Cache::new(backend, config.namespace.clone()))
}

/// Connect and install the result as the process-wide handle
pub async fn init(config: &CacheConfig) -> CacheResult<&'static Cache> {
    if registry::is_initialized() {
        return Err(CacheError::AlreadyInitialized);
    }

    let cache = connect(config).await?;
    let backend = cache.backend().clone();
    registry::install(cache).map_err(|e| {
        // Lost a race with another init; this connection is not needed
        tokio::spawn(async move {
            let _ = backend.close().await;
        });
        e
    })
}
