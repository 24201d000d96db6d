//! Table provisioning for the SQL store

use sqlx::SqlitePool;
use tracing::info;

/// Create the cache tables if they do not exist yet.
///
/// Timestamps are unix milliseconds. A NULL `expire_time` never expires.
pub async fn create_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Ensuring cache tables exist");

    // Scalar entries (also holds counters and locks)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_kvs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cache_key TEXT NOT NULL UNIQUE,
            cache_value BLOB NOT NULL,
            expire_time INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_cache_kvs_expire_time ON cache_kvs (expire_time)
        "#,
    )
    .execute(pool)
    .await?;

    // Map fields
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_maps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cache_key TEXT NOT NULL,
            cache_field TEXT NOT NULL,
            cache_value TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (cache_key, cache_field)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only message log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_cache_messages_channel ON cache_messages (channel, id)
        "#,
    )
    .execute(pool)
    .await?;

    // Subscriber cursors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_subscriptions (
            channel TEXT NOT NULL,
            subscriber TEXT NOT NULL,
            last_message_id INTEGER NOT NULL DEFAULT -1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (channel, subscriber)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
