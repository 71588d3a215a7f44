use crate::domain::observation::MarketObservation;
use crate::domain::prediction::UsedLag;
use crate::error::PredictError;
use crate::storage::DatasetAccessor;
use anyhow::bail;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// How lag slots without a backing observation are filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LagPadding {
    /// Repeat the most recent prior close; `0.0` when there is none.
    #[default]
    RepeatLast,
    Zero,
}

impl LagPadding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepeatLast => "repeat_last",
            Self::Zero => "zero",
        }
    }
}

impl FromStr for LagPadding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repeat_last" => Ok(Self::RepeatLast),
            "zero" => Ok(Self::Zero),
            other => bail!("unknown lag padding policy '{other}'"),
        }
    }
}

/// Lag values, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedLags {
    lags: Vec<UsedLag>,
}

impl ResolvedLags {
    /// Pads `prior` (newest first) out to `depth` slots.
    pub fn pad(prior: &[MarketObservation], depth: usize, padding: LagPadding) -> Self {
        let fill = match (padding, prior.first()) {
            (LagPadding::RepeatLast, Some(latest)) => latest.close,
            _ => 0.0,
        };

        let lags = (0..depth)
            .map(|idx| match prior.get(idx) {
                Some(o) => UsedLag {
                    value: o.close,
                    defaulted: false,
                    source_date: Some(o.date),
                },
                None => UsedLag {
                    value: fill,
                    defaulted: true,
                    source_date: None,
                },
            })
            .collect();

        Self { lags }
    }

    pub fn values(&self) -> Vec<f64> {
        self.lags.iter().map(|l| l.value).collect()
    }

    /// 1-based, matching `Close_lag{n}`.
    pub fn get(&self, n: usize) -> Option<&UsedLag> {
        n.checked_sub(1).and_then(|idx| self.lags.get(idx))
    }

    pub fn len(&self) -> usize {
        self.lags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lags.is_empty()
    }

    pub fn defaulted_count(&self) -> usize {
        self.lags.iter().filter(|l| l.defaulted).count()
    }

    /// Keys are zero-padded to the width of the deepest lag (`lag01`..`lag12`)
    /// so map order is recency order.
    pub fn to_map(&self) -> BTreeMap<String, UsedLag> {
        let width = self.lags.len().to_string().len();
        self.lags
            .iter()
            .enumerate()
            .map(|(idx, lag)| (format!("lag{:0width$}", idx + 1), *lag))
            .collect()
    }
}

pub struct LagResolver {
    dataset: Arc<dyn DatasetAccessor>,
    padding: LagPadding,
}

impl LagResolver {
    pub fn new(dataset: Arc<dyn DatasetAccessor>, padding: LagPadding) -> Self {
        Self { dataset, padding }
    }

    pub fn padding(&self) -> LagPadding {
        self.padding
    }

    /// Closes strictly before `as_of`, newest first, padded to `depth`.
    ///
    /// Fails with `SymbolNotFound` when the symbol has no rows at all.
    pub async fn resolve_lags(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        depth: usize,
    ) -> Result<ResolvedLags, PredictError> {
        let mut prior = self.dataset.query_before(symbol, as_of, depth).await?;

        if prior.is_empty() && !self.dataset.has_symbol(symbol).await? {
            return Err(PredictError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        prior.retain(|o| o.date < as_of);
        prior.sort_by(|a, b| b.date.cmp(&a.date));
        prior.truncate(depth);

        let lags = ResolvedLags::pad(&prior, depth, self.padding);
        if lags.defaulted_count() > 0 {
            tracing::debug!(
                %symbol,
                %as_of,
                available = prior.len(),
                defaulted = lags.defaulted_count(),
                padding = self.padding.as_str(),
                "insufficient history; lag slots padded"
            );
        }
        Ok(lags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::csv_dataset::CsvDataset;

    fn obs(day: u32, close: f64) -> MarketObservation {
        MarketObservation {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            symbol: "PPL".to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn resolver(rows: Vec<MarketObservation>, padding: LagPadding) -> LagResolver {
        LagResolver::new(Arc::new(CsvDataset::from_observations(rows)), padding)
    }

    #[tokio::test]
    async fn full_history_returns_three_most_recent_closes() {
        let r = resolver(
            vec![obs(1, 100.0), obs(2, 102.0), obs(3, 101.0), obs(4, 150.0)],
            LagPadding::RepeatLast,
        );
        let lags = r.resolve_lags("PPL", d(4), 3).await.unwrap();
        assert_eq!(lags.values(), vec![101.0, 102.0, 100.0]);
        assert_eq!(lags.defaulted_count(), 0);
        assert_eq!(lags.get(1).unwrap().source_date, Some(d(3)));
    }

    #[tokio::test]
    async fn single_prior_observation_repeats_last_close() {
        let r = resolver(vec![obs(2, 100.0)], LagPadding::RepeatLast);
        let lags = r.resolve_lags("PPL", d(3), 3).await.unwrap();

        assert_eq!(lags.values(), vec![100.0, 100.0, 100.0]);
        let map = lags.to_map();
        assert!(!map["lag1"].defaulted);
        assert!(map["lag2"].defaulted);
        assert!(map["lag3"].defaulted);
        assert_eq!(map["lag3"].source_date, None);
    }

    #[tokio::test]
    async fn zero_policy_fills_with_zero() {
        let r = resolver(vec![obs(2, 100.0)], LagPadding::Zero);
        let lags = r.resolve_lags("PPL", d(3), 3).await.unwrap();
        assert_eq!(lags.values(), vec![100.0, 0.0, 0.0]);
        assert_eq!(lags.defaulted_count(), 2);
    }

    #[tokio::test]
    async fn history_only_after_date_pads_everything_with_zero() {
        let r = resolver(vec![obs(5, 100.0)], LagPadding::RepeatLast);
        let lags = r.resolve_lags("PPL", d(3), 3).await.unwrap();
        assert_eq!(lags.values(), vec![0.0, 0.0, 0.0]);
        assert_eq!(lags.defaulted_count(), 3);
    }

    #[tokio::test]
    async fn symbol_without_rows_is_not_found() {
        let r = resolver(vec![obs(1, 100.0)], LagPadding::RepeatLast);
        let err = r.resolve_lags("AAPL", d(3), 3).await.unwrap_err();
        assert_eq!(
            err,
            PredictError::SymbolNotFound {
                symbol: "AAPL".to_string()
            }
        );
    }

    #[test]
    fn deep_lag_keys_sort_in_recency_order() {
        let prior: Vec<MarketObservation> = (1..=12).rev().map(|day| obs(day, day as f64)).collect();
        let map = ResolvedLags::pad(&prior, 12, LagPadding::RepeatLast).to_map();

        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys[..3], ["lag01", "lag02", "lag03"]);
        assert_eq!(keys[11], "lag12");
        let values: Vec<f64> = map.values().map(|l| l.value).collect();
        assert_eq!(values, (1..=12u32).rev().map(f64::from).collect::<Vec<_>>());

        let shallow = ResolvedLags::pad(&prior, 3, LagPadding::RepeatLast).to_map();
        assert!(shallow.contains_key("lag1") && shallow.contains_key("lag3"));
    }

    #[test]
    fn parses_padding_policy() {
        assert_eq!("repeat_last".parse::<LagPadding>().unwrap(), LagPadding::RepeatLast);
        assert_eq!("ZERO".parse::<LagPadding>().unwrap(), LagPadding::Zero);
        assert!("mean".parse::<LagPadding>().is_err());
    }
}
