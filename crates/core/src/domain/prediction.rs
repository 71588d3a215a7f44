use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A validated request to predict one day's close.
///
/// Numeric inputs stay optional here so the feature assembler can report every
/// missing field at once. `close` is informational and never becomes a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub date: NaiveDate,
    pub symbol: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<f64>,
    pub close: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsedLag {
    pub value: f64,
    /// True when no observation backed this slot and the padding policy filled it.
    pub defaulted: bool,
    pub source_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFeature {
    pub name: String,
    pub value: f64,
}

/// Ordered model input. Order is the training-time column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    fields: Vec<NamedFeature>,
}

impl FeatureVector {
    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        self.fields.push(NamedFeature {
            name: name.into(),
            value,
        });
    }

    pub fn fields(&self) -> &[NamedFeature] {
        &self.fields
    }

    pub fn values(&self) -> Vec<f64> {
        self.fields.iter().map(|f| f.value).collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub symbol: String,
    pub date: NaiveDate,
    pub predicted_close: f64,
    /// Keyed `lag1`..`lagN`, most recent first.
    pub used_lags: BTreeMap<String, UsedLag>,
    pub features: FeatureVector,
    pub model: String,
}

impl PredictionResult {
    pub fn defaulted_lags(&self) -> Vec<&str> {
        self.used_lags
            .iter()
            .filter(|(_, lag)| lag.defaulted)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_vector_serializes_in_insertion_order() {
        let mut fv = FeatureVector::default();
        fv.push("Open", 103.0);
        fv.push("High", 105.0);

        let v = serde_json::to_value(&fv).unwrap();
        assert_eq!(
            v,
            serde_json::json!([
                {"name": "Open", "value": 103.0},
                {"name": "High", "value": 105.0},
            ])
        );
        assert_eq!(fv.values(), vec![103.0, 105.0]);
        assert_eq!(fv.get("High"), Some(105.0));
    }
}
