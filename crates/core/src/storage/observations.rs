use crate::domain::observation::MarketObservation;
use crate::storage::csv_dataset::CsvDataset;
use crate::storage::DatasetAccessor;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

type ObservationRow = (String, NaiveDate, f64, f64, f64, f64, f64);

fn into_observation(row: ObservationRow) -> MarketObservation {
    let (symbol, date, open, high, low, close, volume) = row;
    MarketObservation {
        date,
        symbol,
        open,
        high,
        low,
        close,
        volume,
    }
}

/// `market_observations` table behind the dataset accessor.
#[derive(Debug, Clone)]
pub struct PgDataset {
    pool: sqlx::PgPool,
}

impl PgDataset {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl DatasetAccessor for PgDataset {
    fn source_name(&self) -> &'static str {
        "postgres"
    }

    async fn query_before(
        &self,
        symbol: &str,
        before: NaiveDate,
        limit: usize,
    ) -> anyhow::Result<Vec<MarketObservation>> {
        let limit = i64::try_from(limit).context("lag limit out of range")?;
        let rows: Vec<ObservationRow> = sqlx::query_as(
            "SELECT symbol, trade_date, open, high, low, close, volume \
             FROM market_observations \
             WHERE upper(symbol) = upper($1) AND trade_date < $2 \
             ORDER BY trade_date DESC \
             LIMIT $3",
        )
        .persistent(false)
        .bind(symbol.trim())
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select market_observations before {before} failed ({symbol})"))?;

        Ok(rows.into_iter().map(into_observation).collect())
    }

    async fn has_symbol(&self, symbol: &str) -> anyhow::Result<bool> {
        let found: (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM market_observations WHERE upper(symbol) = upper($1))",
        )
        .persistent(false)
        .bind(symbol.trim())
        .fetch_one(&self.pool)
        .await
        .context("select market_observations symbol failed")?;
        Ok(found.0)
    }

    async fn latest_on_or_before(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<MarketObservation>> {
        let row: Option<ObservationRow> = sqlx::query_as(
            "SELECT symbol, trade_date, open, high, low, close, volume \
             FROM market_observations \
             WHERE upper(symbol) = upper($1) AND trade_date <= $2 \
             ORDER BY trade_date DESC \
             LIMIT 1",
        )
        .persistent(false)
        .bind(symbol.trim())
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("select market_observations on {date} failed ({symbol})"))?;

        Ok(row.map(into_observation))
    }

    async fn symbols(&self) -> anyhow::Result<Vec<String>> {
        // One spelling per symbol: the one on its latest row.
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT ON (upper(symbol)) symbol \
             FROM market_observations \
             ORDER BY upper(symbol), trade_date DESC",
        )
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .context("select distinct symbols failed")?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

// Must name the same expression as the unique index in the migrations.
const UPSERT_CONFLICT_CLAUSE: &str = " ON CONFLICT ((upper(symbol)), trade_date) DO UPDATE \
       SET symbol = EXCLUDED.symbol, open = EXCLUDED.open, high = EXCLUDED.high, \
           low = EXCLUDED.low, close = EXCLUDED.close, volume = EXCLUDED.volume";

/// Collapses rows to one per `(upper(symbol), date)`, the later row winning,
/// matching what the in-memory dataset keeps.
pub fn dedupe_observations(rows: &[MarketObservation]) -> Vec<MarketObservation> {
    CsvDataset::from_observations(rows.iter().cloned()).into_observations()
}

/// Upserts every row in one transaction; either all land or none do.
pub async fn upsert_observations_atomic(
    pool: &sqlx::PgPool,
    rows: &[MarketObservation],
    batch_size: usize,
) -> anyhow::Result<u64> {
    anyhow::ensure!(!rows.is_empty(), "rows must be non-empty");
    anyhow::ensure!(batch_size >= 1, "batch size must be >= 1");

    let rows = dedupe_observations(rows);

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut affected: u64 = 0;
    for (batch_idx, chunk) in rows.chunks(batch_size).enumerate() {
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO market_observations (symbol, trade_date, open, high, low, close, volume) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.symbol.trim())
                .push_bind(row.date)
                .push_bind(row.open)
                .push_bind(row.high)
                .push_bind(row.low)
                .push_bind(row.close)
                .push_bind(row.volume);
        });
        qb.push(UPSERT_CONFLICT_CLAUSE);

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert market_observations failed")?;
        affected += res.rows_affected();

        tracing::debug!(
            batch_idx = batch_idx + 1,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "market_observations batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

pub async fn record_ingest_run(
    pool: &sqlx::PgPool,
    source: &str,
    status: &str,
    rows_written: u64,
    error: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let finished_at: DateTime<Utc> = Utc::now();
    let rows_written = i64::try_from(rows_written).unwrap_or(i64::MAX);

    sqlx::query(
        "INSERT INTO observation_ingest_runs (id, finished_at, source, status, rows_written, error) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .persistent(false)
    .bind(id)
    .bind(finished_at)
    .bind(source)
    .bind(status)
    .bind(rows_written)
    .bind(error)
    .execute(pool)
    .await
    .context("insert observation_ingest_runs failed")?;

    Ok(id)
}
