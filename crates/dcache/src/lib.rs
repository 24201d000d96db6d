//! dcache: one cache and coordination API over Redis or SQL
//!
//! ```no_run
//! # async fn run() -> dcache::CacheResult<()> {
//! use std::time::Duration;
//!
//! let config = dcache::CacheConfig::load(None)?;
//! let cache = dcache::init(&config).await?;
//!
//! cache.store("launch:abc", &"running", Some(Duration::from_secs(60))).await?;
//! cache
//!     .with_lock("launch:abc", Duration::from_secs(30), Duration::from_secs(5), || async {
//!         // launch exactly once
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod auto_type;
pub mod cache;
pub mod codec;
pub mod config;
pub mod registry;
pub mod subscription;
pub mod transaction;

pub use auto_type::AUTO_TYPE_TTL;
pub use cache::{Cache, DEFAULT_NAMESPACE};
pub use self::config::{connect, init, BackendConfig, CacheConfig};
pub use registry::global;
pub use subscription::TypedSubscription;
pub use transaction::CacheTransaction;

pub use dcache_adapters::{RedisBackend, RedisConfig, SqlBackend, SqlConfig};
pub use dcache_core::{
    CacheBackend, CacheError, CacheResult, Delivery, KeyPage, SubscriptionCanceller,
};
