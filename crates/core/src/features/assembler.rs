use crate::domain::prediction::{FeatureVector, PredictionRequest};
use crate::error::PredictError;
use crate::features::lags::ResolvedLags;
use crate::features::schema::{FeatureName, FeatureSchema};

/// Builds the model input from request fields, the symbol code and lags.
/// Pure: no I/O.
#[derive(Debug, Clone)]
pub struct FeatureAssembler {
    schema: FeatureSchema,
}

impl FeatureAssembler {
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Required numeric inputs must be present and finite; `close`, when
    /// given, must be finite too.
    pub fn validate(request: &PredictionRequest) -> Result<(), PredictError> {
        let mut invalid = Vec::new();
        if request.symbol.trim().is_empty() {
            invalid.push("symbol");
        }

        let required = [
            ("open", request.open),
            ("high", request.high),
            ("low", request.low),
            ("volume", request.volume),
        ];
        for (name, value) in required {
            if !value.is_some_and(f64::is_finite) {
                invalid.push(name);
            }
        }
        if request.close.is_some_and(|c| !c.is_finite()) {
            invalid.push("close");
        }

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(PredictError::invalid_fields(invalid))
        }
    }

    pub fn assemble(
        &self,
        request: &PredictionRequest,
        symbol_code: u32,
        lags: &ResolvedLags,
    ) -> Result<FeatureVector, PredictError> {
        Self::validate(request)?;

        let required = |v: Option<f64>| v.unwrap_or(f64::NAN);

        let mut features = FeatureVector::default();
        for column in self.schema.columns() {
            let value = match column {
                FeatureName::Date => self.schema.date_encoding().encode(request.date),
                FeatureName::Open => required(request.open),
                FeatureName::High => required(request.high),
                FeatureName::Low => required(request.low),
                FeatureName::Volume => required(request.volume),
                FeatureName::SymbolCode => f64::from(symbol_code),
                FeatureName::CloseLag(n) => {
                    let lag = lags.get(usize::from(*n)).ok_or_else(|| {
                        PredictError::ModelInvocation(format!(
                            "schema needs Close_lag{n} but only {} lags were resolved",
                            lags.len()
                        ))
                    })?;
                    if !lag.value.is_finite() {
                        return Err(PredictError::Dataset(format!(
                            "non-finite close stored for {} lag {n}",
                            request.symbol
                        )));
                    }
                    lag.value
                }
            };
            features.push(column.column_name(), value);
        }

        Ok(features)
    }
}
