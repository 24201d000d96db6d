//! Eager expiry for the SQL store
//!
//! Reads already ignore expired rows; the sweeper physically removes them,
//! trims the message log and drops subscriber rows nobody refreshes.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::ops::now_millis;
use super::pubsub::HEARTBEAT_INTERVAL;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_entries: u64,
    pub pruned_messages: u64,
    pub stale_subscriptions: u64,
}

/// Delete expired scalar rows and, if `retention` is set, messages older
/// than it along with subscriber rows nobody has refreshed within it.
///
/// A subscriber row always gets at least two heartbeats of grace, so a live
/// poll task never loses its row to a short retention.
pub async fn sweep(
    pool: &SqlitePool,
    retention: Option<Duration>,
) -> Result<SweepStats, sqlx::Error> {
    let now = now_millis();

    let expired_entries = sqlx::query(
        r#"
        DELETE FROM cache_kvs WHERE expire_time IS NOT NULL AND expire_time <= ?1
        "#,
    )
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();

    let Some(retention) = retention else {
        return Ok(SweepStats {
            expired_entries,
            ..SweepStats::default()
        });
    };

    let cutoff = now.saturating_sub(millis(retention));
    let pruned_messages = sqlx::query(
        r#"
        DELETE FROM cache_messages WHERE created_at < ?1
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let subscription_cutoff = now.saturating_sub(millis(retention.max(HEARTBEAT_INTERVAL * 2)));
    let stale_subscriptions = sqlx::query(
        r#"
        DELETE FROM cache_subscriptions WHERE updated_at < ?1
        "#,
    )
    .bind(subscription_cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(SweepStats {
        expired_entries,
        pruned_messages,
        stale_subscriptions,
    })
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub struct SweeperSettings {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub retention: Option<Duration>,
}

/// Run [`sweep`] after `initial_delay` and then every `interval` until
/// `shutdown`. The task is spawned on `tasks` so shutdown can wait for it.
pub fn start_sweeper(
    tasks: &TaskTracker,
    pool: SqlitePool,
    settings: SweeperSettings,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tasks.spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(settings.initial_delay) => {}
        }

        info!("Cache sweeper started (every {:?})", settings.interval);
        let mut ticker = tokio::time::interval(settings.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match sweep(&pool, settings.retention).await {
                Ok(stats) if stats != SweepStats::default() => info!(
                    "Swept {} expired entries, {} old messages and {} stale subscriptions",
                    stats.expired_entries, stats.pruned_messages, stats.stale_subscriptions
                ),
                Ok(_) => debug!("Sweep found nothing to remove"),
                Err(e) => error!("Failed to sweep expired cache entries: {}", e),
            }
        }

        debug!("Cache sweeper stopped");
    })
}
