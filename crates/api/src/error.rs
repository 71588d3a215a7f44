use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use stockcast_core::error::PredictError;

/// Handler error, rendered as `{"success": false, "error": {...}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Predict(#[from] PredictError),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Predict(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Predict(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        let error = match &self {
            Self::NotFound(_) => json!({ "kind": "not_found", "message": message }),
            Self::Predict(e) => match e.fields() {
                Some(fields) => json!({ "kind": e.kind(), "message": message, "fields": fields }),
                None => json!({ "kind": e.kind(), "message": message }),
            },
        };

        if status.is_server_error() {
            if let Self::Predict(e) = self {
                tracing::error!(kind = ?e.kind(), error = %e, "request failed");
                sentry_anyhow::capture_anyhow(&anyhow::Error::new(e));
            }
        }

        (status, Json(json!({ "success": false, "error": error }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
