pub mod csv_dataset;
pub mod lock;
pub mod observations;

use crate::config::Settings;
use crate::domain::observation::MarketObservation;
use anyhow::Context;
use chrono::NaiveDate;
use std::sync::Arc;

/// Read-only access to historical OHLCV rows.
///
/// Implementations must be safe for concurrent reads. Symbols are matched
/// case-insensitively.
#[async_trait::async_trait]
pub trait DatasetAccessor: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Rows strictly before `before`, newest first, at most `limit`.
    async fn query_before(
        &self,
        symbol: &str,
        before: NaiveDate,
        limit: usize,
    ) -> anyhow::Result<Vec<MarketObservation>>;

    async fn has_symbol(&self, symbol: &str) -> anyhow::Result<bool>;

    /// The row on `date`, or failing that the latest row before it.
    async fn latest_on_or_before(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<MarketObservation>>;

    async fn symbols(&self) -> anyhow::Result<Vec<String>>;
}

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Postgres when `DATABASE_URL` is set, otherwise the CSV file.
pub async fn open_dataset(settings: &Settings) -> anyhow::Result<Arc<dyn DatasetAccessor>> {
    if let Some(db_url) = settings.database_url.as_deref() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        migrate(&pool).await?;
        tracing::info!(source = "postgres", "dataset opened");
        return Ok(Arc::new(observations::PgDataset::new(pool)));
    }

    let path = settings.dataset_path();
    let dataset = tokio::task::spawn_blocking(move || csv_dataset::CsvDataset::load(&path))
        .await
        .context("dataset load task panicked")??;
    Ok(Arc::new(dataset))
}
