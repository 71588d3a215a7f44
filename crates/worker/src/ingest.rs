use anyhow::Context;
use std::path::Path;
use stockcast_core::config::Settings;
use stockcast_core::domain::observation::MarketObservation;
use stockcast_core::ingest::csv_file::read_observations;
use stockcast_core::storage::{lock, observations};
use uuid::Uuid;

const SOURCE: &str = "csv";

pub async fn ingest_csv(settings: &Settings, path: &Path, dry_run: bool) -> anyhow::Result<()> {
    let batch_size = settings.observations_upsert_batch()?;

    let owned = path.to_path_buf();
    let (rows, report) = tokio::task::spawn_blocking(move || read_observations(&owned))
        .await
        .context("csv parse task panicked")??;

    tracing::info!(
        path = %path.display(),
        rows_read = report.rows_read,
        rows_skipped = report.rows_skipped,
        rows_valid = rows.len(),
        "csv parsed"
    );
    anyhow::ensure!(!rows.is_empty(), "no valid rows in {}", path.display());

    if dry_run {
        tracing::info!(dry_run = true, rows = rows.len(), "skipping database write");
        return Ok(());
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    stockcast_core::storage::migrate(&pool).await?;

    let mut lock_conn = pool
        .acquire()
        .await
        .context("acquire lock connection failed")?;
    if !lock::try_acquire_ingest_lock(&mut lock_conn).await? {
        tracing::warn!("ingest lock not acquired; another run in progress");
        return Ok(());
    }

    let outcome = write_and_record(&pool, &rows, batch_size).await;
    let released = lock::release_ingest_lock(&mut lock_conn).await;

    let (run_id, written) = settle_locked_run(outcome, released)?;
    tracing::info!(%run_id, written, "market_observations ingested");
    Ok(())
}

async fn write_and_record(
    pool: &sqlx::PgPool,
    rows: &[MarketObservation],
    batch_size: usize,
) -> anyhow::Result<(Uuid, u64)> {
    match observations::upsert_observations_atomic(pool, rows, batch_size).await {
        Ok(written) => {
            let run_id =
                observations::record_ingest_run(pool, SOURCE, "success", written, None).await?;
            Ok((run_id, written))
        }
        Err(err) => {
            let message = format!("{err:#}");
            if let Err(ledger_err) =
                observations::record_ingest_run(pool, SOURCE, "failed", 0, Some(&message)).await
            {
                tracing::error!(error = ?ledger_err, "failed to record failed ingest run");
            }
            Err(err)
        }
    }
}

/// The run's own error wins; a failed or no-op unlock is reported but only
/// fails an otherwise successful run when the unlock query itself errored.
fn settle_locked_run<T>(
    outcome: anyhow::Result<T>,
    released: anyhow::Result<bool>,
) -> anyhow::Result<T> {
    match (outcome, released) {
        (Err(err), Err(unlock_err)) => {
            tracing::error!(error = ?unlock_err, "ingest lock release failed");
            Err(err)
        }
        (Err(err), _) => Err(err),
        (Ok(_), Err(unlock_err)) => Err(unlock_err),
        (Ok(value), Ok(held)) => {
            if !held {
                tracing::warn!("ingest lock was not held by this session at release");
            }
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_error_takes_precedence_over_unlock_error() {
        let res: anyhow::Result<u64> = settle_locked_run(
            Err(anyhow::anyhow!("upsert failed")),
            Err(anyhow::anyhow!("unlock failed")),
        );
        assert_eq!(res.unwrap_err().to_string(), "upsert failed");
    }

    #[test]
    fn unlock_error_fails_an_otherwise_good_run() {
        let res = settle_locked_run(Ok(3u64), Err(anyhow::anyhow!("unlock failed")));
        assert_eq!(res.unwrap_err().to_string(), "unlock failed");
    }

    #[test]
    fn successful_run_survives_a_noop_unlock() {
        assert_eq!(settle_locked_run(Ok(3u64), Ok(false)).unwrap(), 3);
        assert_eq!(settle_locked_run(Ok(3u64), Ok(true)).unwrap(), 3);
    }
}
