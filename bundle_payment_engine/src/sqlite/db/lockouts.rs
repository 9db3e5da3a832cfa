use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::traits::LockoutError;

/// Increments the attempt counter for `key` in a single upsert and stretches its expiry to `expires_at`.
/// The increment and the TTL refresh are one statement, so concurrent attempts from multiple service instances
/// are never lost, and the returned count comes from the writing connection itself.
pub async fn record_attempt(
    key: &str,
    expires_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, LockoutError> {
    let row: (i64,) = sqlx::query_as(
        r#"
            INSERT INTO lockout_counters (key, hits, expires_at) VALUES ($1, 1, $2)
            ON CONFLICT (key) DO UPDATE SET
                hits = hits + 1,
                expires_at = excluded.expires_at
            RETURNING hits;
        "#,
    )
    .bind(key)
    .bind(expires_at)
    .fetch_one(conn)
    .await?;
    trace!("🔒️ Attempt recorded; counter now at {}", row.0);
    Ok(row.0)
}

/// The live hit count for `key`. An expired counter reads as zero even before eviction removes the row.
pub async fn hits_for(key: &str, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<i64, LockoutError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"SELECT hits FROM lockout_counters WHERE key = $1 AND unixepoch(expires_at) > unixepoch($2)"#,
    )
    .bind(key)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(hits,)| hits).unwrap_or(0))
}

pub async fn reset(key: &str, conn: &mut SqliteConnection) -> Result<(), LockoutError> {
    let _ = sqlx::query(r#"DELETE FROM lockout_counters WHERE key = $1"#).bind(key).execute(conn).await?;
    Ok(())
}

pub async fn evict_expired(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, LockoutError> {
    let result = sqlx::query(r#"DELETE FROM lockout_counters WHERE unixepoch(expires_at) <= unixepoch($1)"#)
        .bind(now)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
