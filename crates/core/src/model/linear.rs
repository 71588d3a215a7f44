use crate::model::{check_input, check_output, ModelError, Regressor};
use anyhow::{ensure, Context};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    #[serde(default)]
    name: Option<String>,
    intercept: f64,
    coefficients: Vec<f64>,
    #[serde(default)]
    feature_names: Option<Vec<String>>,
}

/// `intercept + coefficients · x`, exported from an ordinary least squares fit.
#[derive(Debug, Clone)]
pub struct LinearRegressor {
    name: String,
    intercept: f64,
    coefficients: Vec<f64>,
    feature_names: Option<Vec<String>>,
}

impl LinearRegressor {
    pub fn new(intercept: f64, coefficients: Vec<f64>) -> anyhow::Result<Self> {
        ensure!(!coefficients.is_empty(), "linear model needs at least one coefficient");
        ensure!(
            intercept.is_finite() && coefficients.iter().all(|c| c.is_finite()),
            "linear model parameters must be finite"
        );
        Ok(Self {
            name: "linear".to_string(),
            intercept,
            coefficients,
            feature_names: None,
        })
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let artifact: LinearArtifact =
            serde_json::from_str(text).context("linear model JSON does not match schema")?;

        let mut model = Self::new(artifact.intercept, artifact.coefficients)?;
        if let Some(names) = artifact.feature_names {
            ensure!(
                names.len() == model.coefficients.len(),
                "feature_names lists {} names for {} coefficients",
                names.len(),
                model.coefficients.len()
            );
            model.feature_names = Some(names);
        }
        if let Some(name) = artifact.name.filter(|n| !n.trim().is_empty()) {
            model.name = name;
        }
        Ok(model)
    }
}

impl Regressor for LinearRegressor {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_features(&self) -> usize {
        self.coefficients.len()
    }

    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        check_input(features, self.coefficients.len())?;
        let dot: f64 = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(c, x)| c * x)
            .sum();
        check_output(self.intercept + dot)
    }
}
