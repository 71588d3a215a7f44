mod error;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use error::{ApiError, ApiResult};
use stockcast_core::config::Settings;
use stockcast_core::domain::contract::{ObservationLookupPayload, PredictRequestPayload};
use stockcast_core::domain::prediction::PredictionResult;
use stockcast_core::error::PredictError;
use stockcast_core::service::PredictionService;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let port = settings.port()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // No degraded mode: without model, encoder and data there is nothing to serve.
    let service = match PredictionService::from_settings(&settings)
        .await
        .context("prediction service failed to start")
    {
        Ok(service) => service,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = ?e, "startup failed");
            return Err(e);
        }
    };

    let state = AppState {
        service: Arc::new(service),
    };
    let app = app(state, &settings.cors_allowed_origins());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Clone)]
struct AppState {
    service: Arc<PredictionService>,
}

fn app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/predict", post(predict))
        .route("/api/stocks", get(list_stocks))
        .route("/api/predict/fetch-data", post(fetch_data))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    success: bool,
    #[serde(flatten)]
    result: PredictionResult,
}

async fn predict(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<PredictResponse>> {
    let Json(body) = body.map_err(|_| PredictError::invalid_fields(["body"]))?;
    let payload: PredictRequestPayload =
        serde_json::from_value(body).map_err(|_| PredictError::invalid_fields(["body"]))?;

    let request = payload.validate_and_into_request(Utc::now().date_naive())?;
    let result = state.service.predict(&request).await?;

    Ok(Json(PredictResponse {
        success: true,
        result,
    }))
}

#[derive(Debug, Serialize)]
struct StocksResponse {
    success: bool,
    stocks: Vec<String>,
    count: usize,
}

async fn list_stocks(State(state): State<AppState>) -> ApiResult<Json<StocksResponse>> {
    let stocks = state.service.available_symbols().await?;
    Ok(Json(StocksResponse {
        success: true,
        count: stocks.len(),
        stocks,
    }))
}

#[derive(Debug, Serialize)]
struct ObservationData {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Debug, Serialize)]
struct ObservationResponse {
    success: bool,
    /// As requested.
    symbol: String,
    /// As stored.
    observed_symbol: String,
    date: NaiveDate,
    observed_date: NaiveDate,
    data: ObservationData,
}

/// Prefills the prediction form from stored data.
async fn fetch_data(
    State(state): State<AppState>,
    body: Result<Json<ObservationLookupPayload>, JsonRejection>,
) -> ApiResult<Json<ObservationResponse>> {
    let Json(payload) = body.map_err(|_| PredictError::invalid_fields(["body"]))?;
    let (symbol, date) = payload.validate()?;

    let row = state
        .service
        .lookup_observation(&symbol, date)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no data for {symbol} on or before {date}")))?;

    Ok(Json(ObservationResponse {
        success: true,
        symbol,
        observed_symbol: row.symbol,
        date,
        observed_date: row.date,
        data: ObservationData {
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        },
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
