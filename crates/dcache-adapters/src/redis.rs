//! Redis adapter
//!
//! Near pass-through mapping of the backend contract onto native commands.
//! The only translation is nil replies becoming `NotFound`.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use dcache_core::keys::{lock_key, LOCK_SENTINEL};
use dcache_core::lock::acquire_with_retry;
use dcache_core::{
    delivery_channel, CacheBackend, CacheError, CacheResult, DeliverySender, KeyPage, MapPage,
    Subscription, Transaction, TxOp,
};
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::sentinel::Sentinel;
use redis::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RedisConfig;

/// Pause before re-subscribing after the receive loop lost its connection
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Decrement only keys that exist, so an absent counter reads as nil
const DECREASE_EXISTING_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('DECR', KEYS[1])
end
return false
"#;

pub struct RedisBackend {
    config: RedisConfig,
    client: redis::Client,
    conn: ConnectionManager,
    shutdown: CancellationToken,
}

impl RedisBackend {
    /// Connect and verify the server answers `PING`
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        info!("Connecting to Redis at {}", config.display_addr());

        let client = open_client(config).await?;
        let mut conn = with_timeout(config, ConnectionManager::new(client.clone())).await?;
        let _: String = with_timeout(config, redis::cmd("PING").query_async(&mut conn)).await?;

        info!("Redis connection established");

        Ok(Self {
            config: config.clone(),
            client,
            conn,
            shutdown: CancellationToken::new(),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

/// Client for the configured server, or for the master the sentinels
/// currently report
async fn open_client(config: &RedisConfig) -> CacheResult<redis::Client> {
    if config.sentinel.is_none() {
        return Ok(redis::Client::open(config.connection_info()?)?);
    }

    let master_name = config.sentinel_config()?.master_name.clone();
    let mut sentinel = Sentinel::build(config.sentinel_nodes()?)?;
    let master = config.master_node_info();
    let lookup = sentinel.async_master_for(&master_name, Some(&master));
    let client = with_timeout(config, lookup).await?;
    debug!("Sentinels resolved master {}", master_name);
    Ok(client)
}

async fn with_timeout<T, F>(config: &RedisConfig, fut: F) -> redis::RedisResult<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match config.socket_timeout() {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err((ErrorKind::IoError, "timed out connecting to Redis").into())),
        None => fut.await,
    }
}

fn px(ttl: Duration) -> u64 {
    // PX rejects 0; a zero TTL still has to expire immediately
    (ttl.as_millis() as u64).max(1)
}

fn pairs(flat: Vec<String>) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        out.push((field, value));
    }
    out
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn close(&self) -> CacheResult<()> {
        info!("Closing Redis backend");
        self.shutdown.cancel();
        Ok(())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(px(ttl));
        }
        cmd.query_async::<_, ()>(&mut self.conn()).await?;
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> CacheResult<Vec<u8>> {
        let value: Option<Vec<u8>> =
            redis::cmd("GET").arg(key).query_async(&mut self.conn()).await?;
        value.ok_or(CacheError::NotFound)
    }

    async fn get_string(&self, key: &str) -> CacheResult<String> {
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut self.conn()).await?;
        value.ok_or(CacheError::NotFound)
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        Ok(redis::cmd("DEL").arg(key).query_async(&mut self.conn()).await?)
    }

    async fn count(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(redis::cmd("EXISTS").arg(keys).query_async(&mut self.conn()).await?)
    }

    async fn set_map_field(&self, key: &str, field: &str, value: &str) -> CacheResult<()> {
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn set_map_fields(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<_, ()>(&mut self.conn()).await?;
        Ok(())
    }

    async fn get_map_field(&self, key: &str, field: &str) -> CacheResult<String> {
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await?;
        value.ok_or(CacheError::NotFound)
    }

    async fn delete_map_field(&self, key: &str, field: &str) -> CacheResult<()> {
        redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn get_map(&self, key: &str) -> CacheResult<Vec<(String, String)>> {
        let map: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut self.conn()).await?;
        if map.is_empty() {
            return Err(CacheError::NotFound);
        }
        Ok(map.into_iter().collect())
    }

    async fn scan_map_page(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        page_size: usize,
    ) -> CacheResult<MapPage> {
        let mut cmd = redis::cmd("HSCAN");
        cmd.arg(key).arg(cursor);
        if !pattern.is_empty() {
            cmd.arg("MATCH").arg(pattern);
        }
        cmd.arg("COUNT").arg(page_size);

        let (next_cursor, flat): (u64, Vec<String>) = cmd.query_async(&mut self.conn()).await?;
        Ok(MapPage {
            fields: pairs(flat),
            next_cursor,
        })
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(px(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        Ok(redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.conn())
            .await?)
    }

    async fn increase(&self, key: &str) -> CacheResult<i64> {
        Ok(redis::cmd("INCR").arg(key).query_async(&mut self.conn()).await?)
    }

    async fn decrease(&self, key: &str) -> CacheResult<i64> {
        let value: Option<i64> = redis::cmd("EVAL")
            .arg(DECREASE_EXISTING_SCRIPT)
            .arg(1)
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        value.ok_or(CacheError::NotFound)
    }

    async fn scan_keys_page(
        &self,
        pattern: &str,
        cursor: u64,
        page_size: usize,
    ) -> CacheResult<KeyPage> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor);
        if !pattern.is_empty() {
            cmd.arg("MATCH").arg(pattern);
        }
        cmd.arg("COUNT").arg(page_size);

        let (next_cursor, keys): (u64, Vec<String>) = cmd.query_async(&mut self.conn()).await?;
        Ok(KeyPage { keys, next_cursor })
    }

    async fn transaction(&self, tx: Transaction) -> CacheResult<()> {
        if tx.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in tx.into_ops() {
            match op {
                TxOp::Set { key, value, ttl } => {
                    pipe.cmd("SET").arg(key).arg(value);
                    if let Some(ttl) = ttl {
                        pipe.arg("PX").arg(px(ttl));
                    }
                }
                TxOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                TxOp::SetMapField { key, field, value } => {
                    pipe.cmd("HSET").arg(key).arg(field).arg(value);
                }
                TxOp::DeleteMapField { key, field } => {
                    pipe.cmd("HDEL").arg(key).arg(field);
                }
                TxOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64);
                }
                TxOp::Increase { key } => {
                    pipe.cmd("INCR").arg(key);
                }
                TxOp::Publish { channel, message } => {
                    pipe.cmd("PUBLISH").arg(channel).arg(message);
                }
            }
            pipe.ignore();
        }

        // Plain MULTI/EXEC, no WATCH: the queued commands run back to back
        // with no other client's commands in between.
        pipe.query_async::<_, ()>(&mut self.conn()).await?;
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
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<Subscription> {
        let pubsub = with_timeout(&self.config, open_pubsub(&self.client, channel)).await?;
        debug!("Subscribed to Redis channel {}", channel);

        let (sender, subscription) = delivery_channel(channel, self.shutdown.child_token());
        tokio::spawn(receive_loop(
            self.config.clone(),
            channel.to_string(),
            pubsub,
            sender,
        ));

        Ok(subscription)
    }
}

/// Open a dedicated connection and wait for the SUBSCRIBE confirmation
async fn open_pubsub(client: &redis::Client, channel: &str) -> redis::RedisResult<PubSub> {
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Resolve the server again (the master may have moved) and re-subscribe
async fn reopen_pubsub(config: &RedisConfig, channel: &str) -> CacheResult<PubSub> {
    let client = open_client(config).await?;
    Ok(with_timeout(config, open_pubsub(&client, channel)).await?)
}

async fn receive_loop(
    config: RedisConfig,
    channel: String,
    mut pubsub: PubSub,
    mut sender: DeliverySender,
) {
    loop {
        let stopped = {
            let messages = pubsub.on_message();
            tokio::pin!(messages);
            loop {
                tokio::select! {
                    _ = sender.cancelled() => break true,
                    msg = messages.next() => match msg {
                        Some(msg) => match msg.get_payload::<String>() {
                            Ok(payload) => {
                                if !sender.deliver(payload).await {
                                    break true;
                                }
                            }
                            Err(e) => warn!("Dropping undecodable message on {}: {}", channel, e),
                        },
                        None => break false,
                    },
                }
            }
        };

        if stopped {
            debug!("Redis subscription to {} cancelled", channel);
            return;
        }

        warn!("Lost Redis subscription to {}, will retry in 1 second", channel);
        sender.interrupt(format!("subscription to {} lost", channel));

        loop {
            tokio::select! {
                _ = sender.cancelled() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
            match reopen_pubsub(&config, &channel).await {
                Ok(fresh) => {
                    info!("Re-subscribed to Redis channel {}", channel);
                    pubsub = fresh;
                    sender.recovered();
                    break;
                }
                Err(e) => error!(
                    "Failed to receive message from Redis: {}, will retry in 1 second",
                    e
                ),
            }
        }
    }
}
