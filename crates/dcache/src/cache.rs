//! Typed, namespaced cache handle

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dcache_core::keys::{join_key, strip_namespace};
use dcache_core::{CacheBackend, CacheResult, KeyPage, Transaction, DEFAULT_SCAN_PAGE_SIZE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{decode_text, decode_value, encode_text, encode_value};
use crate::subscription::TypedSubscription;
use crate::transaction::CacheTransaction;

/// Namespace tag used when none is configured
pub const DEFAULT_NAMESPACE: &str = "dcache";

/// Cheap to clone; every clone shares the same backend.
///
/// All keys, lock names and channels passed in are logical: they are
/// prefixed with `<namespace>:` before they reach the backend.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    namespace: Arc<str>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: Arc::from(namespace.into()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Physical key for a logical key
    pub fn key(&self, key: &str) -> String {
        join_key(&[&*self.namespace, key])
    }

    pub async fn close(&self) -> CacheResult<()> {
        self.backend.close().await
    }

    // Scalars

    pub async fn store<T: Serialize + 'static>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.store_raw(self.key(key), value, ttl).await
    }

    pub(crate) async fn store_raw<T: Serialize + 'static>(
        &self,
        physical_key: String,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let bytes = encode_value(value)?;
        self.backend.set(&physical_key, bytes, ttl).await
    }

    pub async fn get<T: DeserializeOwned + 'static>(&self, key: &str) -> CacheResult<T> {
        self.get_raw(&self.key(key)).await
    }

    pub(crate) async fn get_raw<T: DeserializeOwned + 'static>(
        &self,
        physical_key: &str,
    ) -> CacheResult<T> {
        let bytes = self.backend.get_bytes(physical_key).await?;
        decode_value(bytes)
    }

    pub async fn get_string(&self, key: &str) -> CacheResult<String> {
        self.backend.get_string(&self.key(key)).await
    }

    pub async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>> {
        self.backend.get_bytes(&self.key(key)).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<u64> {
        self.backend.delete(&self.key(key)).await
    }

    /// How many of `keys` currently exist
    pub async fn count(&self, keys: &[&str]) -> CacheResult<u64> {
        let physical: Vec<String> = keys.iter().map(|key| self.key(key)).collect();
        self.backend.count(&physical).await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.count(&[key]).await? > 0)
    }

    pub async fn set_if_not_exists<T: Serialize + 'static>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let bytes = encode_value(value)?;
        self.backend.set_if_not_exists(&self.key(key), bytes, ttl).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.backend.expire(&self.key(key), ttl).await
    }

    pub async fn increase(&self, key: &str) -> CacheResult<i64> {
        self.backend.increase(&self.key(key)).await
    }

    pub async fn decrease(&self, key: &str) -> CacheResult<i64> {
        self.backend.decrease(&self.key(key)).await
    }

    // Maps

    pub async fn set_map_field<V: Serialize + 'static>(
        &self,
        key: &str,
        field: &str,
        value: &V,
    ) -> CacheResult<()> {
        let text = encode_text(value)?;
        self.backend.set_map_field(&self.key(key), field, &text).await
    }

    pub async fn set_map_fields<F, V, I>(&self, key: &str, fields: I) -> CacheResult<()>
    where
        F: Into<String>,
        V: Serialize + 'static,
        I: IntoIterator<Item = (F, V)>,
    {
        let encoded = fields
            .into_iter()
            .map(|(field, value)| Ok((field.into(), encode_text(&value)?)))
            .collect::<CacheResult<Vec<(String, String)>>>()?;
        self.backend.set_map_fields(&self.key(key), &encoded).await
    }

    pub async fn get_map_field<V: DeserializeOwned + 'static>(
        &self,
        key: &str,
        field: &str,
    ) -> CacheResult<V> {
        let text = self.backend.get_map_field(&self.key(key), field).await?;
        decode_text(text)
    }

    pub async fn delete_map_field(&self, key: &str, field: &str) -> CacheResult<()> {
        self.backend.delete_map_field(&self.key(key), field).await
    }

    /// Every field of the map. Fields whose value does not decode as `V`
    /// are skipped.
    pub async fn get_map<V: DeserializeOwned + 'static>(
        &self,
        key: &str,
    ) -> CacheResult<HashMap<String, V>> {
        let fields = self.backend.get_map(&self.key(key)).await?;
        Ok(decode_fields(key, fields).collect())
    }

    /// Walk the fields matching `pattern` a page at a time
    pub async fn scan_map_with<V, F>(
        &self,
        key: &str,
        pattern: &str,
        mut on_page: F,
    ) -> CacheResult<()>
    where
        V: DeserializeOwned + 'static,
        F: FnMut(HashMap<String, V>) -> CacheResult<()>,
    {
        let physical = self.key(key);
        let mut cursor = 0;
        loop {
            let page = self
                .backend
                .scan_map_page(&physical, cursor, pattern, DEFAULT_SCAN_PAGE_SIZE)
                .await?;
            on_page(decode_fields(key, page.fields).collect())?;
            if page.next_cursor == 0 {
                return Ok(());
            }
            cursor = page.next_cursor;
        }
    }

    pub async fn scan_map<V: DeserializeOwned + 'static>(
        &self,
        key: &str,
        pattern: &str,
    ) -> CacheResult<HashMap<String, V>> {
        let mut result = HashMap::new();
        self.scan_map_with(key, pattern, |page| {
            result.extend(page);
            Ok(())
        })
        .await?;
        Ok(result)
    }

    // Keys

    /// One page of logical keys matching `pattern`
    pub async fn scan_keys_page(
        &self,
        pattern: &str,
        cursor: u64,
        page_size: usize,
    ) -> CacheResult<KeyPage> {
        let page = self
            .backend
            .scan_keys_page(&self.key(pattern), cursor, page_size)
            .await?;
        Ok(KeyPage {
            keys: self.logical_keys(page.keys),
            next_cursor: page.next_cursor,
        })
    }

    pub async fn scan_keys_with<F>(&self, pattern: &str, mut on_page: F) -> CacheResult<()>
    where
        F: FnMut(Vec<String>) -> CacheResult<()> + Send,
    {
        self.backend
            .scan_keys_with(&self.key(pattern), &mut |keys| on_page(self.logical_keys(keys)))
            .await
    }

    pub async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        self.scan_keys_with(pattern, |page| {
            keys.extend(page);
            Ok(())
        })
        .await?;
        Ok(keys)
    }

    fn logical_keys(&self, keys: Vec<String>) -> Vec<String> {
        keys.into_iter()
            .filter_map(|key| strip_namespace(&self.namespace, &key).map(str::to_string))
            .collect()
    }

    // Transactions

    /// Record writes with `build` and apply them as one atomic unit.
    ///
    /// Nothing reaches the backend if `build` returns an error. Reads are
    /// not available inside the unit.
    pub async fn transaction<F>(&self, build: F) -> CacheResult<()>
    where
        F: FnOnce(&mut CacheTransaction<'_>) -> CacheResult<()>,
    {
        let mut ops = Transaction::new();
        build(&mut CacheTransaction::new(self, &mut ops))?;
        debug!("Applying transaction with {} operation(s)", ops.len());
        self.backend.transaction(ops).await
    }

    // Locks

    /// Block until the lock is held or `acquire_timeout` elapses
    /// (`LockTimeout`). The lock lapses after `hold` even if never released,
    /// and no fencing token is issued: work done under it must tolerate a
    /// second holder once `hold` has passed.
    pub async fn lock(
        &self,
        name: &str,
        hold: Duration,
        acquire_timeout: Duration,
    ) -> CacheResult<()> {
        self.backend.lock(&self.key(name), hold, acquire_timeout).await
    }

    pub async fn unlock(&self, name: &str) -> CacheResult<()> {
        self.backend.unlock(&self.key(name)).await
    }

    /// Run `work` while holding `name`, releasing it whatever the outcome
    pub async fn with_lock<T, F, Fut>(
        &self,
        name: &str,
        hold: Duration,
        acquire_timeout: Duration,
        work: F,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.lock(name, hold, acquire_timeout).await?;
        let result = work().await;
        if let Err(e) = self.unlock(name).await {
            warn!("Failed to release lock {}: {}", name, e);
            if result.is_ok() {
                return Err(e);
            }
        }
        result
    }

    // Pub/sub

    pub async fn publish<T: Serialize + 'static>(
        &self,
        channel: &str,
        message: &T,
    ) -> CacheResult<()> {
        let text = encode_text(message)?;
        self.backend.publish(&self.key(channel), &text).await
    }

    /// Returns once the subscription is live
    pub async fn subscribe<T: DeserializeOwned + 'static>(
        &self,
        channel: &str,
    ) -> CacheResult<TypedSubscription<T>> {
        let inner = self.backend.subscribe(&self.key(channel)).await?;
        Ok(TypedSubscription::new(inner))
    }
}

fn decode_fields<'a, V: DeserializeOwned + 'static>(
    key: &'a str,
    fields: Vec<(String, String)>,
) -> impl Iterator<Item = (String, V)> + 'a {
    fields
        .into_iter()
        .filter_map(move |(field, text)| match decode_text(text) {
            Ok(value) => Some((field, value)),
            Err(e) => {
                warn!("Skipping field {} of {}: {}", field, key, e);
                None
            }
        })
}
