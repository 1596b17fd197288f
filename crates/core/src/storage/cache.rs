use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Cached value for `key`. Expired entries and entries that no longer decode
/// as `T` count as misses.
pub async fn get_json<T: DeserializeOwned>(
    pool: &sqlx::PgPool,
    key: &str,
) -> anyhow::Result<Option<T>> {
    let row: Option<(Value,)> = sqlx::query_as(
        "SELECT value FROM kv_store WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select kv_store failed (key={key})"))?;

    let Some((value,)) = row else {
        return Ok(None);
    };

    match serde_json::from_value::<T>(value) {
        Ok(v) => Ok(Some(v)),
        Err(err) => {
            tracing::warn!(%key, error = %err, "ignoring undecodable cache entry");
            Ok(None)
        }
    }
}

/// Upserts `key`; the entry stops being served once `ttl` has elapsed.
pub async fn set_json<T: Serialize>(
    pool: &sqlx::PgPool,
    key: &str,
    value: &T,
    ttl: Duration,
) -> anyhow::Result<()> {
    let value = serde_json::to_value(value).context("cache value serialize failed")?;
    sqlx::query(
        "INSERT INTO kv_store (key, value, updated_at, expires_at) \
         VALUES ($1, $2, now(), now() + make_interval(secs => $3)) \
         ON CONFLICT (key) DO UPDATE \
           SET value = EXCLUDED.value, updated_at = now(), expires_at = EXCLUDED.expires_at",
    )
    .bind(key)
    .bind(value)
    .bind(ttl_seconds(ttl))
    .execute(pool)
    .await
    .with_context(|| format!("upsert kv_store failed (key={key})"))?;
    Ok(())
}

fn ttl_seconds(ttl: Duration) -> f64 {
    ttl.as_secs_f64().max(1.0)
}

pub async fn delete(pool: &sqlx::PgPool, key: &str) -> anyhow::Result<u64> {
    let res = sqlx::query("DELETE FROM kv_store WHERE key = $1")
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("delete kv_store failed (key={key})"))?;
    Ok(res.rows_affected())
}

pub async fn delete_prefix(pool: &sqlx::PgPool, prefix: &str) -> anyhow::Result<u64> {
    let res = sqlx::query("DELETE FROM kv_store WHERE key LIKE $1 ESCAPE '\\'")
        .bind(like_prefix_pattern(prefix))
        .execute(pool)
        .await
        .with_context(|| format!("delete kv_store by prefix failed (prefix={prefix})"))?;
    Ok(res.rows_affected())
}

fn like_prefix_pattern(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}
