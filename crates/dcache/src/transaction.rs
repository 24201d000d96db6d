//! Write buffer handed to [`Cache::transaction`](crate::Cache::transaction)

use std::time::Duration;

use dcache_core::{CacheResult, Transaction};
use serde::Serialize;

use crate::codec::{encode_text, encode_value};
use crate::Cache;

/// Namespacing, encoding view over a [`Transaction`] being built.
/// Nothing is sent until the closure returns `Ok`.
pub struct CacheTransaction<'a> {
    cache: &'a Cache,
    ops: &'a mut Transaction,
}

impl<'a> CacheTransaction<'a> {
    pub(crate) fn new(cache: &'a Cache, ops: &'a mut Transaction) -> Self {
        Self { cache, ops }
    }

    pub fn store<T: Serialize + 'static>(
        &mut self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<&mut Self> {
        let bytes = encode_value(value)?;
        self.ops.set(self.cache.key(key), bytes, ttl);
        Ok(self)
    }

    pub fn delete(&mut self, key: &str) -> &mut Self {
        self.ops.delete(self.cache.key(key));
        self
    }

    pub fn set_map_field<V: Serialize + 'static>(
        &mut self,
        key: &str,
        field: &str,
        value: &V,
    ) -> CacheResult<&mut Self> {
        let text = encode_text(value)?;
        self.ops.set_map_field(self.cache.key(key), field, text);
        Ok(self)
    }

    pub fn delete_map_field(&mut self, key: &str, field: &str) -> &mut Self {
        self.ops.delete_map_field(self.cache.key(key), field);
        self
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.ops.expire(self.cache.key(key), ttl);
        self
    }

    pub fn increase(&mut self, key: &str) -> &mut Self {
        self.ops.increase(self.cache.key(key));
        self
    }

    pub fn publish<T: Serialize + 'static>(
        &mut self,
        channel: &str,
        message: &T,
    ) -> CacheResult<&mut Self> {
        let text = encode_text(message)?;
        self.ops.publish(self.cache.key(channel), text);
        Ok(self)
    }

    /// Number of writes recorded so far
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
