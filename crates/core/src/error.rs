use serde::Serialize;
use thiserror::Error;

/// Failure of a single prediction request.
///
/// Every variant is deterministic for a given input, so callers never retry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredictError {
    #[error("unknown symbol '{symbol}': not part of the model's training vocabulary")]
    UnknownSymbol { symbol: String },

    #[error("no historical observations for symbol '{symbol}'")]
    SymbolNotFound { symbol: String },

    #[error("missing or invalid fields: {}", fields.join(", "))]
    InvalidInput { fields: Vec<String> },

    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("dataset unavailable: {0}")]
    Dataset(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownSymbol,
    SymbolNotFound,
    InvalidInput,
    ModelInvocation,
    DatasetUnavailable,
}

impl PredictError {
    pub fn invalid_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::InvalidInput {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownSymbol { .. } => ErrorKind::UnknownSymbol,
            Self::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::ModelInvocation(_) => ErrorKind::ModelInvocation,
            Self::Dataset(_) => ErrorKind::DatasetUnavailable,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownSymbol { .. } | Self::SymbolNotFound { .. } | Self::InvalidInput { .. }
        )
    }

    /// Offending field names, for `InvalidInput` only.
    pub fn fields(&self) -> Option<&[String]> {
        match self {
            Self::InvalidInput { fields } => Some(fields),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PredictError {
    fn from(err: anyhow::Error) -> Self {
        Self::Dataset(format!("{err:#}"))
    }
}
