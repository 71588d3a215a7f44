use anyhow::Context;

// Session-scoped advisory lock; keeps two ingest runs from interleaving
// upserts into market_observations. Lock and unlock must run on the same
// connection, so callers hold one for the whole run.
const INGEST_LOCK_KEY: i64 = 0x5354_4F43_4B43; // "STOCKC"

pub async fn try_acquire_ingest_lock(conn: &mut sqlx::PgConnection) -> anyhow::Result<bool> {
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(INGEST_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={INGEST_LOCK_KEY})"))?;
    Ok(acquired.0)
}

/// `Ok(false)` when this session did not hold the lock.
pub async fn release_ingest_lock(conn: &mut sqlx::PgConnection) -> anyhow::Result<bool> {
    let released: (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(INGEST_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to release advisory lock (key={INGEST_LOCK_KEY})"))?;
    Ok(released.0)
}
