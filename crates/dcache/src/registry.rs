//! Process-wide cache handle
//!
//! Assigned at most once, at startup, and never replaced. Code that can take
//! a [`Cache`] as a parameter should; this handle is for call sites that
//! cannot.

use dcache_core::{CacheError, CacheResult};
use once_cell::sync::OnceCell;
use tracing::info;

use crate::Cache;

static GLOBAL: OnceCell<Cache> = OnceCell::new();

/// Install `cache` as the process-wide handle.
/// A second call fails with `AlreadyInitialized` and leaves the first in place.
pub fn install(cache: Cache) -> CacheResult<&'static Cache> {
    let backend = cache.backend().name();
    GLOBAL.set(cache).map_err(|_| CacheError::AlreadyInitialized)?;
    info!("Installed process-wide cache on {} backend", backend);
    global()
}

pub fn global() -> CacheResult<&'static Cache> {
    GLOBAL.get().ok_or(CacheError::NotInitialized)
}

pub fn is_initialized() -> bool {
    GLOBAL.get().is_some()
}

/// Close the installed backend. The handle itself stays installed.
pub async fn close() -> CacheResult<()> {
    global()?.close().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dcache_adapters::{SqlBackend, SqlConfig};
    use tokio_test::assert_err;

    use super::*;

    // The handle is process-wide, so the whole lifecycle lives in one test
    #[tokio::test]
    async fn test_single_assignment_lifecycle() {
        assert!(matches!(global(), Err(CacheError::NotInitialized)));
        assert!(matches!(close().await, Err(CacheError::NotInitialized)));

        let first = SqlBackend::connect(&SqlConfig::in_memory()).await.unwrap();
        let cache = install(Cache::new(Arc::new(first), "first")).unwrap();
        assert_eq!(cache.namespace(), "first");
        assert!(is_initialized());

        let second = SqlBackend::connect(&SqlConfig::in_memory()).await.unwrap();
        let err = assert_err!(install(Cache::new(Arc::new(second), "second")));
        assert!(matches!(err, CacheError::AlreadyInitialized));
        assert_eq!(global().unwrap().namespace(), "first");

        global().unwrap().store("k", &"v", None).await.unwrap();
        assert_eq!(global().unwrap().get_string("k").await.unwrap(), "v");
        close().await.unwrap();
    }
}
