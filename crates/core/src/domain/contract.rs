use crate::domain::observation::parse_date;
use crate::domain::prediction::PredictionRequest;
use crate::error::PredictError;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

/// Prediction request as it arrives on the wire.
///
/// Fields are loosely typed: clients send numbers or numeric strings, and the
/// date under either `date` or `Date`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictRequestPayload {
    #[serde(default)]
    pub symbol: Option<Value>,
    #[serde(default)]
    pub date: Option<Value>,
    /// Older clients send `Date`; `date` wins when both carry a value.
    #[serde(default, rename = "Date")]
    pub date_legacy: Option<Value>,
    #[serde(default)]
    pub open: Option<Value>,
    #[serde(default)]
    pub high: Option<Value>,
    #[serde(default)]
    pub low: Option<Value>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default)]
    pub close: Option<Value>,
}

/// Lookup of a single stored row, used by the data-prefill endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservationLookupPayload {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl PredictRequestPayload {
    /// Checks shape and coerces types. `today` is used when no date is given.
    /// All offending fields are reported together.
    pub fn validate_and_into_request(
        self,
        today: NaiveDate,
    ) -> Result<PredictionRequest, PredictError> {
        let mut invalid: Vec<&'static str> = Vec::new();

        let symbol = match self.symbol.as_ref().and_then(Value::as_str).map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                invalid.push("symbol");
                String::new()
            }
        };

        let raw_date = [self.date.as_ref(), self.date_legacy.as_ref()]
            .into_iter()
            .flatten()
            .find(|v| !is_blank(v));
        let date = match raw_date {
            None => today,
            Some(Value::String(s)) => parse_date(s).unwrap_or_else(|| {
                invalid.push("date");
                today
            }),
            Some(_) => {
                invalid.push("date");
                today
            }
        };

        let mut numeric = |name: &'static str, value: Option<Value>, required: bool| {
            match coerce_number(value) {
                Ok(Some(v)) => Some(v),
                Ok(None) => {
                    if required {
                        invalid.push(name);
                    }
                    None
                }
                Err(()) => {
                    invalid.push(name);
                    None
                }
            }
        };

        let open = numeric("open", self.open, true);
        let high = numeric("high", self.high, true);
        let low = numeric("low", self.low, true);
        let volume = numeric("volume", self.volume, true);
        let close = numeric("close", self.close, false);

        if !invalid.is_empty() {
            return Err(PredictError::invalid_fields(invalid));
        }

        Ok(PredictionRequest {
            date,
            symbol,
            open,
            high,
            low,
            volume,
            close,
        })
    }
}

impl ObservationLookupPayload {
    pub fn validate(self) -> Result<(String, NaiveDate), PredictError> {
        let symbol = self
            .symbol
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let date = self.date.as_deref().and_then(parse_date);

        match (symbol, date) {
            (Some(symbol), Some(date)) => Ok((symbol, date)),
            (symbol, date) => {
                let mut fields = Vec::new();
                if symbol.is_none() {
                    fields.push("symbol");
                }
                if date.is_none() {
                    fields.push("date");
                }
                Err(PredictError::invalid_fields(fields))
            }
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// `Ok(None)` for absent/null, `Err` for anything that is not a finite number.
fn coerce_number(value: Option<Value>) -> Result<Option<f64>, ()> {
    let n = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64().ok_or(())?,
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>().map_err(|_| ())?
        }
        Some(_) => return Err(()),
    };

    if n.is_finite() {
        Ok(Some(n))
    } else {
        Err(())
    }
}
