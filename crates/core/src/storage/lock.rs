use crate::domain::quarter::FiscalQuarter;
use anyhow::Context;

// Advisory locks are scoped to the Postgres session, so acquire and release
// must run on the same connection.
const LOCK_NAMESPACE: i32 = 0x464F_4C49; // "FOLI"

fn lock_key(symbol: &str, quarter: FiscalQuarter) -> String {
    format!("{symbol}:{quarter}")
}

pub async fn try_acquire_analysis_lock(
    conn: &mut sqlx::PgConnection,
    symbol: &str,
    quarter: FiscalQuarter,
) -> anyhow::Result<bool> {
    let key = lock_key(symbol, quarter);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1, hashtext($2))")
        .persistent(false)
        .bind(LOCK_NAMESPACE)
        .bind(&key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_analysis_lock(
    conn: &mut sqlx::PgConnection,
    symbol: &str,
    quarter: FiscalQuarter,
) -> anyhow::Result<()> {
    let key = lock_key(symbol, quarter);
    sqlx::query("SELECT pg_advisory_unlock($1, hashtext($2))")
        .persistent(false)
        .bind(LOCK_NAMESPACE)
        .bind(&key)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}
