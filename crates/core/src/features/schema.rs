//! Training-time feature layout.
//!
//! The model only sees a bare `[f64]`, so the column order and the numeric
//! encoding of the date have to be reproduced exactly. Both live here as a
//! value checked against the model artifact at startup.

use anyhow::{bail, ensure};
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureName {
    Date,
    Open,
    High,
    Low,
    Volume,
    SymbolCode,
    /// 1-based: `CloseLag(1)` is the most recent prior close.
    CloseLag(u8),
}

impl FeatureName {
    /// Column name as written by the training pipeline.
    pub fn column_name(&self) -> String {
        match self {
            Self::Date => "Date".to_string(),
            Self::Open => "Open".to_string(),
            Self::High => "High".to_string(),
            Self::Low => "Low".to_string(),
            Self::Volume => "Volume".to_string(),
            Self::SymbolCode => "Name".to_string(),
            Self::CloseLag(n) => format!("Close_lag{n}"),
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_name())
    }
}

impl FromStr for FeatureName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = match lower.as_str() {
            "date" => Self::Date,
            "open" => Self::Open,
            "high" => Self::High,
            "low" => Self::Low,
            "volume" => Self::Volume,
            "name" | "symbol" | "symbol_code" => Self::SymbolCode,
            other => {
                let Some(n) = other.strip_prefix("close_lag") else {
                    bail!("unknown feature column '{s}'");
                };
                let n: u8 = n
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid lag index in '{s}'"))?;
                ensure!(n >= 1, "lag index must start at 1 (got '{s}')");
                Self::CloseLag(n)
            }
        };
        Ok(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateEncoding {
    /// Seconds since 1970-01-01T00:00:00Z at midnight UTC of the date.
    #[default]
    EpochSeconds,
    EpochDays,
    /// Proleptic Gregorian ordinal, 0001-01-01 is day 1.
    Ordinal,
}

impl DateEncoding {
    pub fn encode(&self, date: NaiveDate) -> f64 {
        let epoch_seconds = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        match self {
            Self::EpochSeconds => epoch_seconds as f64,
            Self::EpochDays => epoch_seconds.div_euclid(86_400) as f64,
            Self::Ordinal => date.num_days_from_ce() as f64,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EpochSeconds => "epoch_seconds",
            Self::EpochDays => "epoch_days",
            Self::Ordinal => "ordinal",
        }
    }
}

impl FromStr for DateEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoch_seconds" | "unix" => Ok(Self::EpochSeconds),
            "epoch_days" => Ok(Self::EpochDays),
            "ordinal" => Ok(Self::Ordinal),
            other => bail!("unknown date encoding '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    columns: Vec<FeatureName>,
    date_encoding: DateEncoding,
}

impl FeatureSchema {
    pub fn new(columns: Vec<FeatureName>, date_encoding: DateEncoding) -> anyhow::Result<Self> {
        ensure!(!columns.is_empty(), "feature schema must have at least one column");

        let mut seen = HashSet::new();
        for c in &columns {
            ensure!(seen.insert(*c), "duplicate feature column '{c}'");
        }

        let mut lags: Vec<u8> = columns
            .iter()
            .filter_map(|c| match c {
                FeatureName::CloseLag(n) => Some(*n),
                _ => None,
            })
            .collect();
        lags.sort_unstable();
        for (idx, n) in lags.iter().enumerate() {
            ensure!(
                usize::from(*n) == idx + 1,
                "lag columns must be contiguous from Close_lag1 (found Close_lag{n})"
            );
        }

        Ok(Self {
            columns,
            date_encoding,
        })
    }

    /// `Date, Open, High, Low, Volume, Name, Close_lag1, Close_lag2, Close_lag3`.
    pub fn training_default() -> Self {
        Self {
            columns: vec![
                FeatureName::Date,
                FeatureName::Open,
                FeatureName::High,
                FeatureName::Low,
                FeatureName::Volume,
                FeatureName::SymbolCode,
                FeatureName::CloseLag(1),
                FeatureName::CloseLag(2),
                FeatureName::CloseLag(3),
            ],
            date_encoding: DateEncoding::EpochSeconds,
        }
    }

    /// Parses a comma separated column list, e.g. `Date,Open,...,Close_lag3`.
    pub fn parse(raw: &str, date_encoding: DateEncoding) -> anyhow::Result<Self> {
        let columns = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(FeatureName::from_str)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(columns, date_encoding)
    }

    pub fn with_date_encoding(mut self, date_encoding: DateEncoding) -> Self {
        self.date_encoding = date_encoding;
        self
    }

    pub fn columns(&self) -> &[FeatureName] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(FeatureName::column_name).collect()
    }

    pub fn date_encoding(&self) -> DateEncoding {
        self.date_encoding
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn lag_depth(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| matches!(c, FeatureName::CloseLag(_)))
            .count()
    }

    /// Fails unless the artifact takes exactly this many inputs and, when it
    /// records its input names, the same names in the same order.
    pub fn verify_against(
        &self,
        model_num_features: usize,
        model_feature_names: Option<&[String]>,
    ) -> anyhow::Result<()> {
        ensure!(
            model_num_features == self.len(),
            "model expects {model_num_features} features, schema defines {} ({})",
            self.len(),
            self.column_names().join(",")
        );

        if let Some(names) = model_feature_names {
            for (idx, (expected, actual)) in self.columns.iter().zip(names).enumerate() {
                let expected = expected.column_name();
                ensure!(
                    expected.eq_ignore_ascii_case(actual.trim()),
                    "feature #{idx} mismatch: schema has '{expected}', model artifact has '{actual}'"
                );
            }
        }

        Ok(())
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::training_default()
    }
}
