//! Auto-typed entries
//!
//! The physical key embeds the value type, `<tag>:auto_type:<type>:<key>`,
//! so the same logical key can hold one value per type.

use std::any::type_name;
use std::future::Future;
use std::time::Duration;

use dcache_core::keys::{join_key, AUTO_TYPE_SEGMENT};
use dcache_core::CacheResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::Cache;

/// Lifetime of every auto-typed entry
pub const AUTO_TYPE_TTL: Duration = Duration::from_secs(30 * 60);

impl Cache {
    pub fn auto_key<T>(&self, key: &str) -> String {
        join_key(&[self.namespace(), AUTO_TYPE_SEGMENT, type_name::<T>(), key])
    }

    pub async fn auto_set<T: Serialize + 'static>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.store_raw(self.auto_key::<T>(key), value, Some(AUTO_TYPE_TTL)).await
    }

    pub async fn auto_get<T: DeserializeOwned + 'static>(&self, key: &str) -> CacheResult<T> {
        self.get_raw(&self.auto_key::<T>(key)).await
    }

    /// Read the entry, or on a miss compute it with `fallback` and write it
    /// back before returning.
    ///
    /// Not locked: concurrent misses may each run `fallback`.
    pub async fn auto_get_or_insert_with<T, F, Fut>(&self, key: &str, fallback: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let physical = self.auto_key::<T>(key);
        match self.get_raw(&physical).await {
            Err(e) if e.is_not_found() => {
                debug!("Auto-typed miss on {}, computing", physical);
                let value = fallback().await?;
                self.store_raw(physical, &value, Some(AUTO_TYPE_TTL)).await?;
                Ok(value)
            }
            other => other,
        }
    }

    pub async fn auto_delete<T>(&self, key: &str) -> CacheResult<u64> {
        self.backend().delete(&self.auto_key::<T>(key)).await
    }
}
