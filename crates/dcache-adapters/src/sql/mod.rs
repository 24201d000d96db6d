//! SQL adapter
//!
//! Emulates the backend contract on four SQLite tables. TTL is an expiry
//! column checked on read and enforced by a background sweeper, counters and
//! conditional sets are single upsert statements, and pub/sub is a message
//! log polled by one task per subscription.

pub mod ops;
pub mod pattern;
pub mod pubsub;
pub mod schema;
pub mod sweeper;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use dcache_core::keys::{lock_key, LOCK_SENTINEL};
use dcache_core::lock::acquire_with_retry;
use dcache_core::{
    delivery_channel, next_offset_cursor, CacheBackend, CacheError, CacheResult, KeyPage, MapPage,
    Subscription, Transaction, TxOp,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::SqlConfig;
use self::ops::{expire_at, now_millis};
use self::pubsub::{PollSettings, INITIAL_CURSOR};
use self::sweeper::{SweepStats, SweeperSettings};

pub struct SqlBackend {
    pool: SqlitePool,
    config: SqlConfig,
    shutdown: CancellationToken,
    /// Sweeper and subscription poll tasks
    tasks: TaskTracker,
}

impl SqlBackend {
    pub async fn connect(config: &SqlConfig) -> CacheResult<Self> {
        info!("Connecting to SQL cache store at {}", config.url);

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout())
            .pragma("case_sensitive_like", "ON");

        let mut pool_options =
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
        if config.is_in_memory() {
            // Every connection to :memory: is its own database, keep exactly one alive
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = pool_options.connect_with(options).await?;
        Self::from_pool(pool, config.clone()).await
    }

    /// Wrap an existing pool. Connections must have `case_sensitive_like` on
    /// for pattern scans to match case sensitively.
    pub async fn from_pool(pool: SqlitePool, config: SqlConfig) -> CacheResult<Self> {
        if config.create_schema {
            schema::create_tables(&pool).await?;
        }

        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        sweeper::start_sweeper(
            &tasks,
            pool.clone(),
            SweeperSettings {
                initial_delay: config.sweep_initial_delay(),
                interval: config.sweep_interval(),
                retention: config.message_retention(),
            },
            shutdown.child_token(),
        );

        info!("SQL cache store ready");

        Ok(Self {
            pool,
            config,
            shutdown,
            tasks,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run one sweep now instead of waiting for the background task
    pub async fn sweep_expired(&self) -> CacheResult<SweepStats> {
        Ok(sweeper::sweep(&self.pool, self.config.message_retention()).await?)
    }
}

impl Drop for SqlBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl CacheBackend for SqlBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    /// Stops the sweeper and every poll task, waits for them to remove
    /// their subscriber rows, then closes the pool.
    async fn close(&self) -> CacheResult<()> {
        info!("Closing SQL cache store");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.pool.close().await;
        Ok(())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let now = now_millis();
        let mut conn = self.pool.acquire().await?;
        ops::upsert_value(&mut conn, key, &value, expire_at(ttl, now), now).await?;
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>> {
        let mut conn = self.pool.acquire().await?;
        ops::select_value(&mut conn, key, now_millis())
            .await?
            .ok_or(CacheError::NotFound)
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = ops::delete_key(&mut tx, key, now_millis()).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn count(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.acquire().await?;
        let count = ops::count_live(&mut conn, keys, now_millis()).await?;
        Ok(count.max(0) as u64)
    }

    async fn set_map_field(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.pool.acquire().await?;
        ops::upsert_field(&mut conn, key, field, value, now_millis()).await?;
        Ok(())
    }

    async fn set_map_fields(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        for (field, value) in fields {
            ops::upsert_field(&mut tx, key, field, value, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_map_field(&self, key: &str, field: &str) -> CacheResult<String> {
        let mut conn = self.pool.acquire().await?;
        ops::select_field(&mut conn, key, field)
            .await?
            .ok_or(CacheError::NotFound)
    }

    async fn delete_map_field(&self, key: &str, field: &str) -> CacheResult<()> {
        let mut conn = self.pool.acquire().await?;
        ops::delete_field(&mut conn, key, field).await?;
        Ok(())
    }

    async fn get_map(&self, key: &str) -> CacheResult<Vec<(String, String)>> {
        let mut conn = self.pool.acquire().await?;
        let fields = ops::select_all_fields(&mut conn, key).await?;
        if fields.is_empty() {
            return Err(CacheError::NotFound);
        }
        Ok(fields)
    }

    async fn scan_map_page(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        page_size: usize,
    ) -> CacheResult<MapPage> {
        let page_size = page_size.max(1);
        let mut conn = self.pool.acquire().await?;
        let fields = ops::select_fields(&mut conn, key, pattern, cursor, page_size).await?;
        let next_cursor = next_offset_cursor(cursor, fields.len(), page_size);
        Ok(MapPage { fields, next_cursor })
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let now = now_millis();
        let mut conn = self.pool.acquire().await?;
        Ok(ops::insert_if_absent(&mut conn, key, &value, expire_at(ttl, now), now).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = now_millis();
        let mut conn = self.pool.acquire().await?;
        let at = expire_at(Some(ttl), now).unwrap_or(now);
        Ok(ops::update_expiry(&mut conn, key, at, now).await?)
    }

    async fn increase(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.pool.acquire().await?;
        Ok(ops::increment(&mut conn, key, now_millis()).await?)
    }

    async fn decrease(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.pool.acquire().await?;
        ops::decrement(&mut conn, key, now_millis())
            .await?
            .ok_or(CacheError::NotFound)
    }

    async fn scan_keys_page(
        &self,
        pattern: &str,
        cursor: u64,
        page_size: usize,
    ) -> CacheResult<KeyPage> {
        let page_size = page_size.max(1);
        let mut conn = self.pool.acquire().await?;
        let keys = ops::select_keys(&mut conn, pattern, cursor, page_size, now_millis()).await?;
        let next_cursor = next_offset_cursor(cursor, keys.len(), page_size);
        Ok(KeyPage { keys, next_cursor })
    }

    async fn transaction(&self, tx: Transaction) -> CacheResult<()> {
        if tx.is_empty() {
            return Ok(());
        }

        let now = now_millis();
        let mut db_tx = self.pool.begin().await?;
        for op in tx.into_ops() {
            match op {
                TxOp::Set { key, value, ttl } => {
                    ops::upsert_value(&mut db_tx, &key, &value, expire_at(ttl, now), now).await?;
                }
                TxOp::Delete { key } => {
                    ops::delete_key(&mut db_tx, &key, now).await?;
                }
                TxOp::SetMapField { key, field, value } => {
                    ops::upsert_field(&mut db_tx, &key, &field, &value, now).await?;
                }
                TxOp::DeleteMapField { key, field } => {
                    ops::delete_field(&mut db_tx, &key, &field).await?;
                }
                TxOp::Expire { key, ttl } => {
                    let at = expire_at(Some(ttl), now).unwrap_or(now);
                    ops::update_expiry(&mut db_tx, &key, at, now).await?;
                }
                TxOp::Increase { key } => {
                    ops::increment(&mut db_tx, &key, now).await?;
                }
                TxOp::Publish { channel, message } => {
                    ops::append_message(&mut db_tx, &channel, &message, now).await?;
                }
            }
        }
        // Dropping db_tx on an early return rolls everything back
        db_tx.commit().await?;
        Ok(())
    }

    async fn lock(&self, name: &str, hold: Duration, acquire_timeout: Duration) -> CacheResult<()> {
        let key = lock_key(name);
        acquire_with_retry(name, acquire_timeout, || {
            self.set_if_not_exists(&key, LOCK_SENTINEL.to_vec(), Some(hold))
        })
        .await
    }

    async fn unlock(&self, name: &str) -> CacheResult<()> {
        self.delete(&lock_key(name)).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()> {
        let mut conn = self.pool.acquire().await?;
        let id = ops::append_message(&mut conn, channel, message, now_millis()).await?;
        debug!("Published message {} on {}", id, channel);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<Subscription> {
        let subscriber = pubsub::subscriber_id();
        pubsub::register_subscriber(&self.pool, channel, &subscriber).await?;
        debug!("Registered subscriber {} on {}", subscriber, channel);

        let (sender, subscription) = delivery_channel(channel, self.shutdown.child_token());
        self.tasks.spawn(pubsub::poll_loop(
            self.pool.clone(),
            channel.to_string(),
            subscriber,
            INITIAL_CURSOR,
            PollSettings {
                interval: self.config.poll_interval(),
                batch_size: self.config.poll_batch_size.max(1),
            },
            sender,
        ));

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use dcache_core::Delivery;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    async fn backend() -> SqlBackend {
        let config = SqlConfig {
            poll_interval_ms: 10,
            ..SqlConfig::in_memory()
        };
        SqlBackend::connect(&config).await.unwrap()
    }

    async fn recv_message(sub: &mut Subscription) -> Delivery {
        tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out waiting for a delivery")
            .expect("subscription ended early")
    }

    async fn subscription_rows(backend: &SqlBackend, channel: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM cache_subscriptions WHERE channel = ?1")
            .bind(channel)
            .fetch_one(backend.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = backend().await;

        assert_ok!(backend.set("k", b"v1".to_vec(), None).await);
        assert_eq!(backend.get_bytes("k").await.unwrap(), b"v1");
        assert_ok!(backend.set("k", b"v2".to_vec(), Some(Duration::from_secs(60))).await);
        assert_eq!(backend.get_string("k").await.unwrap(), "v2");

        assert_eq!(backend.delete("k").await.unwrap(), 1);
        assert!(backend.get_bytes("k").await.unwrap_err().is_not_found());
        assert_eq!(backend.delete("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let backend = backend().await;

        backend.set("short", b"v".to_vec(), Some(Duration::from_millis(30))).await.unwrap();
        assert_eq!(backend.count(&["short".to_string()]).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(backend.get_bytes("short").await.unwrap_err().is_not_found());
        assert_eq!(backend.count(&["short".to_string()]).await.unwrap(), 0);
        assert!(!backend.expire("short", Duration::from_secs(10)).await.unwrap());
        assert_eq!(backend.delete("short").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expire_extends_and_shortens() {
        let backend = backend().await;

        backend.set("k", b"v".to_vec(), Some(Duration::from_millis(30))).await.unwrap();
        assert!(backend.expire("k", Duration::from_secs(60)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_ok!(backend.get_bytes("k").await);

        assert!(backend.expire("k", Duration::ZERO).await.unwrap());
        assert!(backend.get_bytes("k").await.unwrap_err().is_not_found());
        assert!(!backend.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_count_spans_scalars_and_maps() {
        let backend = backend().await;

        backend.set("a", b"1".to_vec(), None).await.unwrap();
        backend.set_map_field("m", "f", "v").await.unwrap();
        let keys = vec!["a".to_string(), "m".to_string(), "missing".to_string()];
        assert_eq!(backend.count(&keys).await.unwrap(), 2);
        assert_eq!(backend.count(&[]).await.unwrap(), 0);

        assert_eq!(backend.delete("m").await.unwrap(), 1);
        assert_eq!(backend.count(&keys).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_map_fields() {
        let backend = backend().await;

        backend.set_map_field("h", "a", "1").await.unwrap();
        backend
            .set_map_fields(
                "h",
                &[("b".to_string(), "2".to_string()), ("a".to_string(), "3".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(backend.get_map_field("h", "a").await.unwrap(), "3");
        assert_eq!(backend.get_map_field("h", "b").await.unwrap(), "2");
        assert!(backend.get_map_field("h", "c").await.unwrap_err().is_not_found());

        backend.delete_map_field("h", "a").await.unwrap();
        assert!(backend.get_map_field("h", "a").await.unwrap_err().is_not_found());
        assert_eq!(backend.get_map("h").await.unwrap(), vec![("b".to_string(), "2".to_string())]);

        backend.delete_map_field("h", "b").await.unwrap();
        assert!(backend.get_map("h").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_map_scan_pagination() {
        let backend = backend().await;

        for i in 0..25 {
            backend
                .set_map_field("scan", &format!("map_field_{:02}", i), &i.to_string())
                .await
                .unwrap();
        }
        backend.set_map_field("scan", "other", "x").await.unwrap();

        let mut cursor = 0;
        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        loop {
            let page = backend.scan_map_page("scan", cursor, "map_field*", 10).await.unwrap();
            sizes.push(page.fields.len());
            seen.extend(page.fields.into_iter().map(|(field, _)| field));
            if page.next_cursor == 0 {
                break;
            }
            cursor = page.next_cursor;
        }

        assert_eq!(sizes, vec![10, 10, 5]);
        let distinct: HashSet<String> = seen.iter().cloned().collect();
        let expected: HashSet<String> = (0..25).map(|i| format!("map_field_{:02}", i)).collect();
        assert_eq!(seen.len(), distinct.len());
        assert_eq!(distinct, expected);
    }

    #[tokio::test]
    async fn test_scan_keys_pattern_and_case() {
        let backend = backend().await;

        for key in ["app:user:1", "app:user:2", "app:User:3", "app:session:1", "app_user"] {
            backend.set(key, b"v".to_vec(), None).await.unwrap();
        }
        backend.set_map_field("app:user:map", "f", "v").await.unwrap();
        backend
            .set("app:user:gone", b"v".to_vec(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut keys = backend.scan_keys("app:user:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["app:user:1", "app:user:2", "app:user:map"]);

        // `_` is literal in a glob
        let keys = backend.scan_keys("app_*").await.unwrap();
        assert_eq!(keys, vec!["app_user"]);

        let page = backend.scan_keys_page("app:*", 0, 2).await.unwrap();
        assert_eq!(page.keys.len(), 2);
        assert_eq!(page.next_cursor, 2);
    }

    #[tokio::test]
    async fn test_set_if_not_exists() {
        let backend = backend().await;

        assert!(backend.set_if_not_exists("nx", b"a".to_vec(), None).await.unwrap());
        assert!(!backend.set_if_not_exists("nx", b"b".to_vec(), None).await.unwrap());
        assert_eq!(backend.get_bytes("nx").await.unwrap(), b"a");

        // An expired row is taken over
        backend.set("stale", b"old".to_vec(), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(backend.set_if_not_exists("stale", b"new".to_vec(), None).await.unwrap());
        assert_eq!(backend.get_bytes("stale").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_concurrent_set_if_not_exists_single_winner() {
        let backend = Arc::new(backend().await);

        let mut handles = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let value = format!("w{}", i);
                let ttl = Some(Duration::from_secs(10));
                let won = backend
                    .set_if_not_exists("race", value.clone().into_bytes(), ttl)
                    .await
                    .unwrap();
                won.then_some(value)
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            winners.extend(handle.await.unwrap());
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(backend.get_string("race").await.unwrap(), winners[0]);
    }

    #[tokio::test]
    async fn test_counters() {
        let backend = backend().await;

        assert!(backend.decrease("hits").await.unwrap_err().is_not_found());
        assert_eq!(backend.increase("hits").await.unwrap(), 1);
        assert_eq!(backend.increase("hits").await.unwrap(), 2);
        assert_eq!(backend.decrease("hits").await.unwrap(), 1);
        assert_eq!(backend.get_string("hits").await.unwrap(), "1");

        backend.set("preset", b"41".to_vec(), None).await.unwrap();
        assert_eq!(backend.increase("preset").await.unwrap(), 42);

        backend.set("expired", b"9".to_vec(), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.increase("expired").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increase() {
        let backend = Arc::new(backend().await);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move { backend.increase("shared").await.unwrap() }));
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort();

        assert_eq!(values, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_lock_exclusive_until_unlock() {
        let backend = backend().await;

        assert_ok!(backend.lock("job", Duration::from_secs(10), Duration::from_millis(100)).await);
        let err = assert_err!(
            backend
                .lock("job", Duration::from_secs(10), Duration::from_millis(100))
                .await
        );
        assert!(err.is_lock_timeout());

        assert_ok!(backend.unlock("job").await);
        assert_ok!(backend.lock("job", Duration::from_secs(10), Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_lock_released_by_hold_ttl() {
        let backend = backend().await;

        assert_ok!(backend.lock("ttl", Duration::from_millis(50), Duration::from_millis(10)).await);
        assert_ok!(backend.lock("ttl", Duration::from_secs(10), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_lock_contention_one_holder() {
        let backend = Arc::new(backend().await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend
                    .lock("contended", Duration::from_secs(10), Duration::from_millis(50))
                    .await
                    .is_ok()
            }));
        }

        let mut holders = 0;
        for handle in handles {
            if handle.await.unwrap() {
                holders += 1;
            }
        }
        assert_eq!(holders, 1);
    }

    #[tokio::test]
    async fn test_transaction_commits_all() {
        let backend = backend().await;
        backend.set("gone", b"x".to_vec(), None).await.unwrap();

        let mut tx = Transaction::new();
        tx.set("a", b"1".to_vec(), None)
            .set_map_field("h", "f", "v")
            .delete("gone")
            .increase("n")
            .publish("events", "hello");
        assert_ok!(backend.transaction(tx).await);

        assert_eq!(backend.get_bytes("a").await.unwrap(), b"1");
        assert_eq!(backend.get_map_field("h", "f").await.unwrap(), "v");
        assert!(backend.get_bytes("gone").await.unwrap_err().is_not_found());
        assert_eq!(backend.get_string("n").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_failure() {
        let backend = backend().await;
        sqlx::query("DROP TABLE cache_messages")
            .execute(backend.pool())
            .await
            .unwrap();

        let mut tx = Transaction::new();
        tx.set("a", b"1".to_vec(), None).publish("events", "boom");
        assert_err!(backend.transaction(tx).await);

        assert!(backend.get_bytes("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pubsub_order_for_every_subscriber() {
        let backend = backend().await;

        let mut subs = Vec::new();
        for _ in 0..3 {
            subs.push(backend.subscribe("orders").await.unwrap());
        }
        assert_eq!(subscription_rows(&backend, "orders").await, 3);

        for message in ["m1", "m2", "m3"] {
            backend.publish("orders", message).await.unwrap();
        }
        backend.publish("other", "noise").await.unwrap();

        for sub in subs.iter_mut() {
            for expected in ["m1", "m2", "m3"] {
                assert_eq!(recv_message(sub).await, Delivery::Message(expected.to_string()));
            }
        }
    }

    #[tokio::test]
    async fn test_pubsub_during_publication() {
        let backend = Arc::new(backend().await);
        backend.publish("live", "m1").await.unwrap();

        let publisher = {
            let backend = backend.clone();
            tokio::spawn(async move {
                for message in ["m2", "m3", "m4"] {
                    backend.publish("live", message).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };
        let mut sub = backend.subscribe("live").await.unwrap();
        publisher.await.unwrap();

        for expected in ["m1", "m2", "m3", "m4"] {
            assert_eq!(recv_message(&mut sub).await, Delivery::Message(expected.to_string()));
        }
    }

    #[tokio::test]
    async fn test_cancel_removes_subscription_row() {
        let backend = backend().await;

        let mut sub = backend.subscribe("ephemeral").await.unwrap();
        assert_eq!(subscription_rows(&backend, "ephemeral").await, 1);

        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());

        let ended = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(ended, None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(subscription_rows(&backend, "ephemeral").await, 0);
    }

    #[tokio::test]
    async fn test_cursor_advances_with_delivery() {
        let backend = backend().await;

        let mut sub = backend.subscribe("cursor").await.unwrap();
        backend.publish("cursor", "only").await.unwrap();
        assert_eq!(recv_message(&mut sub).await, Delivery::Message("only".to_string()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let cursors: Vec<i64> = sqlx::query_scalar(
            "SELECT last_message_id FROM cache_subscriptions WHERE channel = 'cursor'",
        )
        .fetch_all(backend.pool())
        .await
        .unwrap();
        assert_eq!(cursors.len(), 1);
        assert!(cursors[0] > INITIAL_CURSOR);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_rows() {
        let backend = backend().await;

        backend.set("keep", b"v".to_vec(), None).await.unwrap();
        backend.set("drop", b"v".to_vec(), Some(Duration::from_millis(1))).await.unwrap();
        backend.publish("log", "old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = backend.sweep_expired().await.unwrap();
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.pruned_messages, 0);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_kvs")
            .fetch_one(backend.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let stats = sweeper::sweep(backend.pool(), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(stats.pruned_messages, 1);
    }

    #[tokio::test]
    async fn test_close_removes_subscriber_rows_from_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqlConfig {
            url: format!("sqlite://{}", dir.path().join("cache.db").display()),
            poll_interval_ms: 10,
            ..SqlConfig::default()
        };

        let backend = SqlBackend::connect(&config).await.unwrap();
        let _first = backend.subscribe("jobs").await.unwrap();
        let _second = backend.subscribe("jobs").await.unwrap();
        assert_eq!(subscription_rows(&backend, "jobs").await, 2);
        assert_ok!(backend.close().await);

        let reopened = SqlBackend::connect(&config).await.unwrap();
        assert_eq!(subscription_rows(&reopened, "jobs").await, 0);
        assert_ok!(reopened.close().await);
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_subscriber_rows() {
        let backend = backend().await;
        let _live = backend.subscribe("jobs").await.unwrap();
        sqlx::query(
            r#"
            INSERT INTO cache_subscriptions
                (channel, subscriber, last_message_id, created_at, updated_at)
            VALUES ('jobs', 'sub_crashed', 4, 0, 0)
            "#,
        )
        .execute(backend.pool())
        .await
        .unwrap();
        assert_eq!(subscription_rows(&backend, "jobs").await, 2);

        let stats = sweeper::sweep(backend.pool(), Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(stats.stale_subscriptions, 1);
        assert_eq!(subscription_rows(&backend, "jobs").await, 1);

        // Without a retention window nothing but expired entries is touched
        let stats = sweeper::sweep(backend.pool(), None).await.unwrap();
        assert_eq!(stats, SweepStats::default());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let backend = backend().await;
        let mut sub = backend.subscribe("closing").await.unwrap();

        assert_ok!(backend.close().await);
        let ended = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(ended, None);
    }
}
