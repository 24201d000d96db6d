//! Backend contract
//!
//! Every store the façade can run on implements [`CacheBackend`]. Keys here
//! are physical keys: namespacing and value encoding happen above this layer.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::types::{KeyPage, MapPage, Subscription, Transaction, DEFAULT_SCAN_PAGE_SIZE};

/// Per-page callback used by the streaming key scan
pub type KeyPageFn<'a> = dyn FnMut(Vec<String>) -> CacheResult<()> + Send + 'a;

/// Capability surface shared by the redis and SQL backends.
///
/// Implementations must be safe for concurrent use from many tasks.
/// Absence (including expiry) is reported as
/// [`CacheError::NotFound`](crate::CacheError::NotFound); transport errors are
/// returned unchanged.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Release connections and stop background tasks
    async fn close(&self) -> CacheResult<()>;

    /// Replace the value and TTL of `key`. `ttl: None` stores without expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>>;

    async fn get_string(&self, key: &str) -> CacheResult<String> {
        let bytes = self.get_bytes(key).await?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Delete `key`, returning the number of keys removed
    async fn delete(&self, key: &str) -> CacheResult<u64>;

    /// Number of the given keys that currently exist
    async fn count(&self, keys: &[String]) -> CacheResult<u64>;

    async fn set_map_field(&self, key: &str, field: &str, value: &str) -> CacheResult<()>;

    async fn set_map_fields(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()>;

    async fn get_map_field(&self, key: &str, field: &str) -> CacheResult<String>;

    /// Remove one field; the rest of the map is untouched
    async fn delete_map_field(&self, key: &str, field: &str) -> CacheResult<()>;

    /// All fields of `key`. A map with no fields is `NotFound`.
    async fn get_map(&self, key: &str) -> CacheResult<Vec<(String, String)>>;

    /// One page of fields of `key` whose name matches the glob `pattern`.
    /// Start with `cursor = 0`; a returned `next_cursor` of 0 ends the scan.
    async fn scan_map_page(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        page_size: usize,
    ) -> CacheResult<MapPage>;

    /// Conditional set. Returns whether this call wrote the value.
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Reset the TTL of `key`. Returns whether the key was present.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn increase(&self, key: &str) -> CacheResult<i64>;

    /// Decrement an existing counter; an absent key is `NotFound`
    async fn decrease(&self, key: &str) -> CacheResult<i64>;

    /// One page of keys matching the glob `pattern`
    async fn scan_keys_page(
        &self,
        pattern: &str,
        cursor: u64,
        page_size: usize,
    ) -> CacheResult<KeyPage>;

    /// Walk every page of a key scan, handing each page to `on_page`
    async fn scan_keys_with(&self, pattern: &str, on_page: &mut KeyPageFn<'_>) -> CacheResult<()> {
        let mut cursor = 0;
        loop {
            let page = self
                .scan_keys_page(pattern, cursor, DEFAULT_SCAN_PAGE_SIZE)
                .await?;
            let next = page.next_cursor;
            on_page(page.keys)?;
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        self.scan_keys_with(pattern, &mut |page| {
            keys.extend(page);
            Ok(())
        })
        .await?;
        Ok(keys)
    }

    /// Apply every buffered write of `tx` as one atomic unit
    async fn transaction(&self, tx: Transaction) -> CacheResult<()>;

    /// Spin on a conditional set of `lock:<name>` until it succeeds or
    /// `acquire_timeout` elapses (`LockTimeout`). The lock expires after
    /// `hold` even if never released.
    async fn lock(&self, name: &str, hold: Duration, acquire_timeout: Duration) -> CacheResult<()>;

    async fn unlock(&self, name: &str) -> CacheResult<()>;

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()>;

    /// Returns once the subscription is established
    async fn subscribe(&self, channel: &str) -> CacheResult<Subscription>;
}
