//! Polling pub/sub on top of the message log
//!
//! Each subscribe call owns a row in `cache_subscriptions` holding the id of
//! the last message it handed over. A poll task reads the next batch past
//! that id, delivers it in id order and persists the cursor after every
//! successful hand-off. Idle tasks refresh their row every
//! [`HEARTBEAT_INTERVAL`]; rows left behind by a crashed process are
//! removed by the sweeper once they are older than the retention window.
//!
//! Hand-off and consumption are not linked, so a consumer that stops
//! between the two must tolerate reprocessing.

use std::time::Duration;

use dcache_core::DeliverySender;
use sqlx::SqlitePool;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::ops::now_millis;

/// Cursor value of a subscription that has not received anything yet
pub const INITIAL_CURSOR: i64 = -1;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LoggedMessage {
    pub id: i64,
    pub message: String,
}

/// Unique within the process, ordered by creation time
pub fn subscriber_id() -> String {
    format!("sub_{}", uuid::Uuid::now_v7().simple())
}

pub async fn register_subscriber(
    pool: &SqlitePool,
    channel: &str,
    subscriber: &str,
) -> Result<(), sqlx::Error> {
    let now = now_millis();
    sqlx::query(
        r#"
        INSERT INTO cache_subscriptions
            (channel, subscriber, last_message_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT(channel, subscriber) DO UPDATE SET updated_at = excluded.updated_at
        "#,
    )
    .bind(channel)
    .bind(subscriber)
    .bind(INITIAL_CURSOR)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fetch_batch(
    pool: &SqlitePool,
    channel: &str,
    after: i64,
    limit: u32,
) -> Result<Vec<LoggedMessage>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, message FROM cache_messages
        WHERE channel = ?1 AND id > ?2
        ORDER BY id ASC
        LIMIT ?3
        "#,
    )
    .bind(channel)
    .bind(after)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await
}

/// Persist `message_id` as the subscriber's cursor and refresh its
/// `updated_at`. Recreates the row if a sweep removed it.
pub async fn save_cursor(
    pool: &SqlitePool,
    channel: &str,
    subscriber: &str,
    message_id: i64,
) -> Result<(), sqlx::Error> {
    let now = now_millis();
    sqlx::query(
        r#"
        INSERT INTO cache_subscriptions
            (channel, subscriber, last_message_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT(channel, subscriber) DO UPDATE SET
            last_message_id = excluded.last_message_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(channel)
    .bind(subscriber)
    .bind(message_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn remove_subscriber(
    pool: &SqlitePool,
    channel: &str,
    subscriber: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        DELETE FROM cache_subscriptions WHERE channel = ?1 AND subscriber = ?2
        "#,
    )
    .bind(channel)
    .bind(subscriber)
    .execute(pool)
    .await?;

    Ok(())
}

/// How often an idle subscriber refreshes its row so the sweeper keeps it
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

pub struct PollSettings {
    pub interval: Duration,
    pub batch_size: u32,
}

/// Poll until the subscription is cancelled, then delete its cursor row
pub async fn poll_loop(
    pool: SqlitePool,
    channel: String,
    subscriber: String,
    mut cursor: i64,
    settings: PollSettings,
    mut sender: DeliverySender,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_saved = Instant::now();

    'poll: loop {
        tokio::select! {
            _ = sender.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let batch = match fetch_batch(&pool, &channel, cursor, settings.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Failed to poll messages on {}: {}", channel, e);
                sender.interrupt(format!("polling {} failed: {}", channel, e));
                continue;
            }
        };
        if batch.is_empty() {
            sender.recovered();
            if last_saved.elapsed() >= HEARTBEAT_INTERVAL {
                match save_cursor(&pool, &channel, &subscriber, cursor).await {
                    Ok(()) => last_saved = Instant::now(),
                    Err(e) => warn!(
                        "Failed to refresh subscription {} on {}: {}",
                        subscriber, channel, e
                    ),
                }
            }
            continue;
        }

        for LoggedMessage { id, message } in batch {
            if !sender.deliver(message).await {
                break 'poll;
            }
            cursor = id;
            match save_cursor(&pool, &channel, &subscriber, id).await {
                Ok(()) => last_saved = Instant::now(),
                Err(e) => error!(
                    "Failed to persist cursor {} for {} on {}: {}",
                    id, subscriber, channel, e
                ),
            }
        }
    }

    debug!("Subscription {} to {} stopped", subscriber, channel);
    if let Err(e) = remove_subscriber(&pool, &channel, &subscriber).await {
        warn!("Failed to remove subscription {} on {}: {}", subscriber, channel, e);
    }
}
