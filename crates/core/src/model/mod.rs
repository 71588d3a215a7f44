pub mod lightgbm;
pub mod linear;

use anyhow::{bail, Context};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Opaque scalar regressor loaded once at startup. Scoring must not mutate
/// state; one instance is shared by all requests.
pub trait Regressor: Send + Sync {
    fn name(&self) -> &str;

    fn num_features(&self) -> usize;

    /// Input column names recorded in the artifact, if any.
    fn feature_names(&self) -> Option<&[String]>;

    fn score(&self, features: &[f64]) -> Result<f64, ModelError>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("expected {expected} features, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("feature #{index} is not finite")]
    NonFiniteInput { index: usize },

    #[error("model produced a non-finite output")]
    NonFiniteOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// LightGBM text dump (`save_model` output).
    LightGbm,
    /// `{"intercept": .., "coefficients": [..], "feature_names": [..]}`.
    LinearJson,
}

impl ModelFormat {
    pub fn infer_from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::LinearJson,
            _ => Self::LightGbm,
        }
    }
}

impl FromStr for ModelFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lightgbm" => Ok(Self::LightGbm),
            "linear-json" | "linear_json" => Ok(Self::LinearJson),
            other => bail!("unknown model format '{other}'"),
        }
    }
}

pub fn load_regressor(path: &Path, format: ModelFormat) -> anyhow::Result<Arc<dyn Regressor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("model file not found or unreadable: {}", path.display()))?;

    let model: Arc<dyn Regressor> = match format {
        ModelFormat::LightGbm => Arc::new(
            lightgbm::LightGbmRegressor::from_model_text(&text)
                .with_context(|| format!("failed to load LightGBM model {}", path.display()))?,
        ),
        ModelFormat::LinearJson => Arc::new(
            linear::LinearRegressor::from_json(&text)
                .with_context(|| format!("failed to load linear model {}", path.display()))?,
        ),
    };

    tracing::info!(
        path = %path.display(),
        model = model.name(),
        num_features = model.num_features(),
        "model loaded"
    );
    Ok(model)
}

pub(crate) fn check_input(features: &[f64], expected: usize) -> Result<(), ModelError> {
    if features.len() != expected {
        return Err(ModelError::ShapeMismatch {
            expected,
            got: features.len(),
        });
    }
    if let Some(index) = features.iter().position(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteInput { index });
    }
    Ok(())
}

pub(crate) fn check_output(value: f64) -> Result<f64, ModelError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ModelError::NonFiniteOutput)
    }
}
