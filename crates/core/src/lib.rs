pub mod domain;
pub mod error;
pub mod features;
pub mod ingest;
pub mod model;
pub mod service;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    use crate::features::lags::LagPadding;
    use crate::features::schema::{DateEncoding, FeatureSchema};
    use crate::model::ModelFormat;

    const DEFAULT_DATASET_PATH: &str = "dataset.csv";
    const DEFAULT_MODEL_PATH: &str = "model.txt";
    const DEFAULT_ENCODER_PATH: &str = "labelencoder_name.json";
    const DEFAULT_PORT: u16 = 5001;
    const DEFAULT_UPSERT_BATCH: usize = 500;
    const DEFAULT_CORS_ORIGINS: &str =
        "http://localhost:3000,http://localhost:5173,http://127.0.0.1:5173";

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub dataset_path: Option<String>,
        pub model_path: Option<String>,
        pub model_format: Option<String>,
        pub encoder_path: Option<String>,
        pub feature_order: Option<String>,
        pub date_encoding: Option<String>,
        pub lag_padding: Option<String>,
        pub sentry_dsn: Option<String>,
        pub cors_allowed_origins: Option<String>,
        pub port: Option<String>,
        pub observations_upsert_batch: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                dataset_path: non_empty_var("DATASET_PATH"),
                model_path: non_empty_var("MODEL_PATH"),
                model_format: non_empty_var("MODEL_FORMAT"),
                encoder_path: non_empty_var("ENCODER_PATH"),
                feature_order: non_empty_var("FEATURE_ORDER"),
                date_encoding: non_empty_var("FEATURE_DATE_ENCODING"),
                lag_padding: non_empty_var("LAG_PADDING"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                cors_allowed_origins: non_empty_var("CORS_ALLOWED_ORIGINS"),
                port: non_empty_var("PORT"),
                observations_upsert_batch: non_empty_var("OBSERVATIONS_UPSERT_BATCH"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn dataset_path(&self) -> PathBuf {
            PathBuf::from(self.dataset_path.as_deref().unwrap_or(DEFAULT_DATASET_PATH))
        }

        pub fn model_path(&self) -> PathBuf {
            PathBuf::from(self.model_path.as_deref().unwrap_or(DEFAULT_MODEL_PATH))
        }

        pub fn encoder_path(&self) -> PathBuf {
            PathBuf::from(self.encoder_path.as_deref().unwrap_or(DEFAULT_ENCODER_PATH))
        }

        pub fn model_format(&self) -> anyhow::Result<ModelFormat> {
            match self.model_format.as_deref() {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid MODEL_FORMAT: {raw}")),
                None => Ok(ModelFormat::infer_from_path(&self.model_path())),
            }
        }

        pub fn feature_schema(&self) -> anyhow::Result<FeatureSchema> {
            let date_encoding = match self.date_encoding.as_deref() {
                Some(raw) => raw
                    .parse::<DateEncoding>()
                    .with_context(|| format!("invalid FEATURE_DATE_ENCODING: {raw}"))?,
                None => DateEncoding::default(),
            };

            let schema = match self.feature_order.as_deref() {
                Some(raw) => FeatureSchema::parse(raw, date_encoding)
                    .with_context(|| format!("invalid FEATURE_ORDER: {raw}"))?,
                None => FeatureSchema::training_default().with_date_encoding(date_encoding),
            };
            Ok(schema)
        }

        pub fn lag_padding(&self) -> anyhow::Result<LagPadding> {
            match self.lag_padding.as_deref() {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid LAG_PADDING: {raw}")),
                None => Ok(LagPadding::default()),
            }
        }

        pub fn port(&self) -> anyhow::Result<u16> {
            match self.port.as_deref() {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid PORT: {raw}")),
                None => Ok(DEFAULT_PORT),
            }
        }

        pub fn observations_upsert_batch(&self) -> anyhow::Result<usize> {
            let size = match self.observations_upsert_batch.as_deref() {
                Some(raw) => raw
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid OBSERVATIONS_UPSERT_BATCH: {raw}"))?,
                None => DEFAULT_UPSERT_BATCH,
            };
            anyhow::ensure!(size >= 1, "OBSERVATIONS_UPSERT_BATCH must be >= 1");
            Ok(size)
        }

        pub fn cors_allowed_origins(&self) -> Vec<String> {
            self.cors_allowed_origins
                .as_deref()
                .unwrap_or(DEFAULT_CORS_ORIGINS)
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

}
