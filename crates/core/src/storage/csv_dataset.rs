use crate::domain::observation::MarketObservation;
use crate::ingest::csv_file::read_observations;
use crate::storage::DatasetAccessor;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::Path;

/// Whole dataset held in memory, grouped by upper-cased symbol and sorted by
/// date. Immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct CsvDataset {
    by_symbol: BTreeMap<String, Vec<MarketObservation>>,
}

impl CsvDataset {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let (rows, report) = read_observations(path)?;
        let dataset = Self::from_observations(rows);
        tracing::info!(
            path = %path.display(),
            rows_read = report.rows_read,
            rows_skipped = report.rows_skipped,
            symbols = dataset.by_symbol.len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Duplicate `(symbol, date)` rows keep the last occurrence.
    pub fn from_observations(rows: impl IntoIterator<Item = MarketObservation>) -> Self {
        let mut by_symbol: BTreeMap<String, BTreeMap<NaiveDate, MarketObservation>> =
            BTreeMap::new();
        let mut duplicates: usize = 0;
        for row in rows {
            let key = row.symbol.to_ascii_uppercase();
            if by_symbol.entry(key).or_default().insert(row.date, row).is_some() {
                duplicates += 1;
            }
        }

        if duplicates > 0 {
            tracing::warn!(duplicates, "duplicate (symbol, date) rows replaced by later rows");
        }

        Self {
            by_symbol: by_symbol
                .into_iter()
                .map(|(symbol, rows)| (symbol, rows.into_values().collect()))
                .collect(),
        }
    }

    /// Every row, grouped by symbol and ascending by date, one per
    /// `(symbol, date)` ignoring case.
    pub fn into_observations(self) -> Vec<MarketObservation> {
        self.by_symbol.into_values().flatten().collect()
    }

    fn series(&self, symbol: &str) -> &[MarketObservation] {
        self.by_symbol
            .get(&symbol.trim().to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

#[async_trait::async_trait]
impl DatasetAccessor for CsvDataset {
    fn source_name(&self) -> &'static str {
        "csv"
    }

    async fn query_before(
        &self,
        symbol: &str,
        before: NaiveDate,
        limit: usize,
    ) -> anyhow::Result<Vec<MarketObservation>> {
        let series = self.series(symbol);
        let end = series.partition_point(|o| o.date < before);
        Ok(series[..end].iter().rev().take(limit).cloned().collect())
    }

    async fn has_symbol(&self, symbol: &str) -> anyhow::Result<bool> {
        Ok(!self.series(symbol).is_empty())
    }

    async fn latest_on_or_before(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<MarketObservation>> {
        let series = self.series(symbol);
        let end = series.partition_point(|o| o.date <= date);
        Ok(end.checked_sub(1).map(|idx| series[idx].clone()))
    }

    async fn symbols(&self) -> anyhow::Result<Vec<String>> {
        // Report the spelling stored in the data, not the lookup key.
        Ok(self
            .by_symbol
            .values()
            .filter_map(|rows| rows.last().map(|o| o.symbol.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(symbol: &str, day: u32, close: f64) -> MarketObservation {
        MarketObservation {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            symbol: symbol.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn dataset() -> CsvDataset {
        CsvDataset::from_observations(vec![
            obs("PPL", 3, 101.0),
            obs("PPL", 1, 100.0),
            obs("AAPL", 2, 190.0),
            obs("PPL", 2, 102.0),
            obs("PPL", 5, 104.0),
        ])
    }

    #[tokio::test]
    async fn query_before_is_strict_and_descending() {
        let ds = dataset();
        let rows = ds.query_before("PPL", d(4), 10).await.unwrap();
        let closes: Vec<f64> = rows.iter().map(|o| o.close).collect();
        assert_eq!(closes, vec![101.0, 102.0, 100.0]);

        let rows = ds.query_before("ppl", d(3), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(2));

        let rows = ds.query_before("PPL", d(5), 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(ds.query_before("PPL", d(1), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookups_for_unknown_symbols_are_empty() {
        let ds = dataset();
        assert!(!ds.has_symbol("MSFT").await.unwrap());
        assert!(ds.has_symbol("aapl").await.unwrap());
        assert!(ds.query_before("MSFT", d(9), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_on_or_before_prefers_exact_date() {
        let ds = dataset();
        let exact = ds.latest_on_or_before("PPL", d(3)).await.unwrap().unwrap();
        assert_eq!(exact.close, 101.0);

        let prior = ds.latest_on_or_before("PPL", d(4)).await.unwrap().unwrap();
        assert_eq!(prior.date, d(3));

        assert!(ds.latest_on_or_before("AAPL", d(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicates_keep_last_row() {
        let ds = CsvDataset::from_observations(vec![obs("PPL", 1, 100.0), obs("PPL", 1, 99.0)]);
        assert_eq!(ds.len(), 1);
        let row = ds.latest_on_or_before("PPL", d(1)).await.unwrap().unwrap();
        assert_eq!(row.close, 99.0);
        assert_eq!(ds.symbols().await.unwrap(), vec!["PPL".to_string()]);
    }
}
