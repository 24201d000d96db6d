//! Row-level statements shared by direct calls and transactions
//!
//! Every function takes a plain connection so the same statement can run on a
//! pooled connection or inside an open database transaction.

use std::time::Duration;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::pattern::glob_to_like;

/// TTL given to a counter created by `increase`
pub const COUNTER_DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn expire_at(ttl: Option<Duration>, now: i64) -> Option<i64> {
    ttl.map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

// Scalar entries

pub async fn upsert_value(
    conn: &mut SqliteConnection,
    key: &str,
    value: &[u8],
    expire_time: Option<i64>,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO cache_kvs (cache_key, cache_value, expire_time, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT(cache_key) DO UPDATE SET
            cache_value = excluded.cache_value,
            expire_time = excluded.expire_time,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(expire_time)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

/// Insert unless a live row exists. An expired row is taken over in place.
pub async fn insert_if_absent(
    conn: &mut SqliteConnection,
    key: &str,
    value: &[u8],
    expire_time: Option<i64>,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO cache_kvs (cache_key, cache_value, expire_time, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT(cache_key) DO UPDATE SET
            cache_value = excluded.cache_value,
            expire_time = excluded.expire_time,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at
        WHERE cache_kvs.expire_time IS NOT NULL AND cache_kvs.expire_time <= ?4
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(expire_time)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn select_value(
    conn: &mut SqliteConnection,
    key: &str,
    now: i64,
) -> Result<Option<Vec<u8>>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT cache_value FROM cache_kvs
        WHERE cache_key = ?1 AND (expire_time IS NULL OR expire_time > ?2)
        "#,
    )
    .bind(key)
    .bind(now)
    .fetch_optional(conn)
    .await
}

/// Remove the scalar row and every map field stored under `key`.
/// Returns 1 if a live entry of either kind existed.
pub async fn delete_key(
    conn: &mut SqliteConnection,
    key: &str,
    now: i64,
) -> Result<u64, sqlx::Error> {
    let removed: Option<Option<i64>> = sqlx::query_scalar(
        r#"
        DELETE FROM cache_kvs WHERE cache_key = ?1 RETURNING expire_time
        "#,
    )
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;
    let scalar_live = matches!(removed, Some(expire) if expire.map_or(true, |at| at > now));

    let fields = sqlx::query(
        r#"
        DELETE FROM cache_maps WHERE cache_key = ?1
        "#,
    )
    .bind(key)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(u64::from(scalar_live || fields > 0))
}

pub async fn update_expiry(
    conn: &mut SqliteConnection,
    key: &str,
    expire_time: i64,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE cache_kvs SET expire_time = ?2, updated_at = ?3
        WHERE cache_key = ?1 AND (expire_time IS NULL OR expire_time > ?3)
        "#,
    )
    .bind(key)
    .bind(expire_time)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Single upsert: a live counter is incremented, an absent or expired one
/// restarts at 1 with [`COUNTER_DEFAULT_TTL`].
pub async fn increment(
    conn: &mut SqliteConnection,
    key: &str,
    now: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO cache_kvs (cache_key, cache_value, expire_time, created_at, updated_at)
        VALUES (?1, CAST('1' AS BLOB), ?2, ?3, ?3)
        ON CONFLICT(cache_key) DO UPDATE SET
            cache_value = CASE
                WHEN cache_kvs.expire_time IS NULL OR cache_kvs.expire_time > ?3
                THEN CAST(CAST(CAST(cache_kvs.cache_value AS INTEGER) + 1 AS TEXT) AS BLOB)
                ELSE excluded.cache_value
            END,
            expire_time = CASE
                WHEN cache_kvs.expire_time IS NULL OR cache_kvs.expire_time > ?3
                THEN cache_kvs.expire_time
                ELSE excluded.expire_time
            END,
            updated_at = excluded.updated_at
        RETURNING CAST(cache_value AS INTEGER)
        "#,
    )
    .bind(key)
    .bind(expire_at(Some(COUNTER_DEFAULT_TTL), now))
    .bind(now)
    .fetch_one(conn)
    .await
}

/// `None` when no live counter exists
pub async fn decrement(
    conn: &mut SqliteConnection,
    key: &str,
    now: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        UPDATE cache_kvs
        SET cache_value = CAST(CAST(CAST(cache_value AS INTEGER) - 1 AS TEXT) AS BLOB),
            updated_at = ?2
        WHERE cache_key = ?1 AND (expire_time IS NULL OR expire_time > ?2)
        RETURNING CAST(cache_value AS INTEGER)
        "#,
    )
    .bind(key)
    .bind(now)
    .fetch_optional(conn)
    .await
}

pub async fn count_live(
    conn: &mut SqliteConnection,
    keys: &[String],
    now: i64,
) -> Result<i64, sqlx::Error> {
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) FROM (SELECT cache_key FROM cache_kvs ");
    query.push("WHERE (expire_time IS NULL OR expire_time > ");
    query.push_bind(now);
    query.push(") AND cache_key IN (");
    let mut separated = query.separated(", ");
    for key in keys {
        separated.push_bind(key.as_str());
    }
    query.push(") UNION SELECT cache_key FROM cache_maps WHERE cache_key IN (");
    let mut separated = query.separated(", ");
    for key in keys {
        separated.push_bind(key.as_str());
    }
    query.push("))");

    query.build_query_scalar().fetch_one(conn).await
}

/// Keys of live scalar entries and of maps, ordered so offsets are stable
pub async fn select_keys(
    conn: &mut SqliteConnection,
    pattern: &str,
    offset: u64,
    limit: usize,
    now: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT cache_key FROM (
            SELECT cache_key FROM cache_kvs WHERE expire_time IS NULL OR expire_time > ?1
            UNION
            SELECT cache_key FROM cache_maps
        )
        WHERE cache_key LIKE ?2 ESCAPE '\'
        ORDER BY cache_key
        LIMIT ?3 OFFSET ?4
        "#,
    )
    .bind(now)
    .bind(glob_to_like(pattern))
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(conn)
    .await
}

// Map fields

pub async fn upsert_field(
    conn: &mut SqliteConnection,
    key: &str,
    field: &str,
    value: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO cache_maps (cache_key, cache_field, cache_value, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        ON CONFLICT(cache_key, cache_field) DO UPDATE SET
            cache_value = excluded.cache_value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(field)
    .bind(value)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn select_field(
    conn: &mut SqliteConnection,
    key: &str,
    field: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT cache_value FROM cache_maps WHERE cache_key = ?1 AND cache_field = ?2
        "#,
    )
    .bind(key)
    .bind(field)
    .fetch_optional(conn)
    .await
}

pub async fn delete_field(
    conn: &mut SqliteConnection,
    key: &str,
    field: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        DELETE FROM cache_maps WHERE cache_key = ?1 AND cache_field = ?2
        "#,
    )
    .bind(key)
    .bind(field)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn select_fields(
    conn: &mut SqliteConnection,
    key: &str,
    pattern: &str,
    offset: u64,
    limit: usize,
) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT cache_field, cache_value FROM cache_maps
        WHERE cache_key = ?1 AND cache_field LIKE ?2 ESCAPE '\'
        ORDER BY id
        LIMIT ?3 OFFSET ?4
        "#,
    )
    .bind(key)
    .bind(glob_to_like(pattern))
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(conn)
    .await
}

pub async fn select_all_fields(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT cache_field, cache_value FROM cache_maps WHERE cache_key = ?1 ORDER BY id
        "#,
    )
    .bind(key)
    .fetch_all(conn)
    .await
}

// Message log

pub async fn append_message(
    conn: &mut SqliteConnection,
    channel: &str,
    message: &str,
    now: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO cache_messages (channel, message, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?3)
        RETURNING id
        "#,
    )
    .bind(channel)
    .bind(message)
    .bind(now)
    .fetch_one(conn)
    .await
}
