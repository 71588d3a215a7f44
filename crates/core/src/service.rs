use crate::config::Settings;
use crate::domain::observation::MarketObservation;
use crate::domain::prediction::{PredictionRequest, PredictionResult};
use crate::error::PredictError;
use crate::features::assembler::FeatureAssembler;
use crate::features::encoder::SymbolEncoder;
use crate::features::lags::{LagPadding, LagResolver};
use crate::features::schema::FeatureSchema;
use crate::model::{load_regressor, Regressor};
use crate::storage::{open_dataset, DatasetAccessor};
use anyhow::Context;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Turns a prediction request into a scored result.
///
/// Built once at startup and shared by reference; every component is either
/// immutable or a read-only dataset query, so `predict` is safe to call
/// concurrently.
pub struct PredictionService {
    encoder: Arc<SymbolEncoder>,
    dataset: Arc<dyn DatasetAccessor>,
    lags: LagResolver,
    assembler: FeatureAssembler,
    model: Arc<dyn Regressor>,
}

impl PredictionService {
    /// Fails when the schema does not match what the model artifact expects.
    pub fn new(
        encoder: Arc<SymbolEncoder>,
        dataset: Arc<dyn DatasetAccessor>,
        model: Arc<dyn Regressor>,
        schema: FeatureSchema,
        padding: LagPadding,
    ) -> anyhow::Result<Self> {
        schema
            .verify_against(model.num_features(), model.feature_names())
            .with_context(|| format!("feature schema does not match model {}", model.name()))?;

        Ok(Self {
            encoder,
            lags: LagResolver::new(dataset.clone(), padding),
            dataset,
            assembler: FeatureAssembler::new(schema),
            model,
        })
    }

    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let encoder = SymbolEncoder::load(&settings.encoder_path())?;
        let model = load_regressor(&settings.model_path(), settings.model_format()?)?;
        let schema = settings.feature_schema()?;
        let padding = settings.lag_padding()?;
        let dataset = open_dataset(settings).await?;

        tracing::info!(
            model = model.name(),
            dataset = dataset.source_name(),
            features = %schema.column_names().join(","),
            date_encoding = schema.date_encoding().as_str(),
            padding = padding.as_str(),
            "prediction service ready"
        );
        Self::new(Arc::new(encoder), dataset, model, schema, padding)
    }

    pub async fn predict(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictionResult, PredictError> {
        FeatureAssembler::validate(request)?;

        let symbol = request.symbol.trim();
        let code = self.encoder.encode(symbol)?;

        let depth = self.assembler.schema().lag_depth();
        let lags = self.lags.resolve_lags(symbol, request.date, depth).await?;

        let features = self.assembler.assemble(request, code, &lags)?;

        let predicted_close = self
            .model
            .score(&features.values())
            .map_err(|e| PredictError::ModelInvocation(e.to_string()))?;

        tracing::info!(
            %symbol,
            date = %request.date,
            predicted_close,
            defaulted_lags = lags.defaulted_count(),
            "prediction served"
        );

        Ok(PredictionResult {
            symbol: symbol.to_string(),
            date: request.date,
            predicted_close,
            used_lags: lags.to_map(),
            features,
            model: self.model.name().to_string(),
        })
    }

    /// Sorted union of the model vocabulary and the symbols present in the data.
    pub async fn available_symbols(&self) -> Result<Vec<String>, PredictError> {
        let mut all: BTreeSet<String> = self.encoder.classes().iter().cloned().collect();
        all.extend(self.dataset.symbols().await?);
        Ok(all.into_iter().collect())
    }

    pub async fn lookup_observation(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<MarketObservation>, PredictError> {
        Ok(self.dataset.latest_on_or_before(symbol, date).await?)
    }

    pub fn encoder(&self) -> &SymbolEncoder {
        &self.encoder
    }

    pub fn dataset(&self) -> &dyn DatasetAccessor {
        self.dataset.as_ref()
    }

    pub fn model(&self) -> &dyn Regressor {
        self.model.as_ref()
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.assembler.schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use crate::storage::csv_dataset::CsvDataset;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every vector it scores and returns `lag1 + 1`.
    #[derive(Default)]
    struct RecordingModel {
        calls: Mutex<Vec<Vec<f64>>>,
    }

    impl Regressor for RecordingModel {
        fn name(&self) -> &str {
            "recording-stub"
        }

        fn num_features(&self) -> usize {
            9
        }

        fn feature_names(&self) -> Option<&[String]> {
            None
        }

        fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
            crate::model::check_input(features, 9)?;
            self.calls.lock().unwrap().push(features.to_vec());
            Ok(features[6] + 1.0)
        }
    }

    /// Always fails to score, as a model with a broken artifact would.
    #[derive(Default)]
    struct FailingModel {
        calls: AtomicUsize,
    }

    impl Regressor for FailingModel {
        fn name(&self) -> &str {
            "failing-stub"
        }

        fn num_features(&self) -> usize {
            9
        }

        fn feature_names(&self) -> Option<&[String]> {
            None
        }

        fn score(&self, _features: &[f64]) -> Result<f64, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::NonFiniteOutput)
        }
    }

    /// Wraps a dataset and counts every query.
    struct CountingDataset {
        inner: CsvDataset,
        queries: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DatasetAccessor for CountingDataset {
        fn source_name(&self) -> &'static str {
            "counting"
        }

        async fn query_before(
            &self,
            symbol: &str,
            before: NaiveDate,
            limit: usize,
        ) -> anyhow::Result<Vec<MarketObservation>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query_before(symbol, before, limit).await
        }

        async fn has_symbol(&self, symbol: &str) -> anyhow::Result<bool> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.has_symbol(symbol).await
        }

        async fn latest_on_or_before(
            &self,
            symbol: &str,
            date: NaiveDate,
        ) -> anyhow::Result<Option<MarketObservation>> {
            self.inner.latest_on_or_before(symbol, date).await
        }

        async fn symbols(&self) -> anyhow::Result<Vec<String>> {
            self.inner.symbols().await
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn ppl(day: u32, close: f64) -> MarketObservation {
        MarketObservation {
            date: d(day),
            symbol: "PPL".to_string(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 40_000.0,
        }
    }

    struct Fixture {
        service: PredictionService,
        model: Arc<RecordingModel>,
        dataset: Arc<CountingDataset>,
    }

    fn fixture(rows: Vec<MarketObservation>) -> Fixture {
        let model = Arc::new(RecordingModel::default());
        let dataset = Arc::new(CountingDataset {
            inner: CsvDataset::from_observations(rows),
            queries: AtomicUsize::new(0),
        });
        let encoder = SymbolEncoder::from_classes(["AAL", "AAPL", "MSFT", "PPL"]).unwrap();
        let service = PredictionService::new(
            Arc::new(encoder),
            dataset.clone(),
            model.clone(),
            FeatureSchema::training_default(),
            LagPadding::RepeatLast,
        )
        .unwrap();
        Fixture {
            service,
            model,
            dataset,
        }
    }

    fn request(symbol: &str) -> PredictionRequest {
        PredictionRequest {
            date: d(4),
            symbol: symbol.to_string(),
            open: Some(103.0),
            high: Some(105.0),
            low: Some(102.0),
            volume: Some(50_000.0),
            close: None,
        }
    }

    #[tokio::test]
    async fn end_to_end_ppl_scenario() {
        let f = fixture(vec![ppl(1, 100.0), ppl(2, 102.0), ppl(3, 101.0)]);

        let result = f.service.predict(&request("PPL")).await.unwrap();

        let calls = f.model.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![1_704_326_400.0, 103.0, 105.0, 102.0, 50_000.0, 3.0, 101.0, 102.0, 100.0]
        );

        assert_eq!(result.predicted_close, 102.0);
        assert_eq!(result.symbol, "PPL");
        assert_eq!(result.model, "recording-stub");
        assert_eq!(result.used_lags["lag1"].value, 101.0);
        assert_eq!(result.used_lags["lag2"].value, 102.0);
        assert_eq!(result.used_lags["lag3"].value, 100.0);
        assert!(result.defaulted_lags().is_empty());
        assert_eq!(result.features.values(), calls[0]);
    }

    #[tokio::test]
    async fn unknown_symbol_short_circuits_before_any_io() {
        let f = fixture(vec![ppl(1, 100.0)]);

        let err = f.service.predict(&request("ZZZ9")).await.unwrap_err();

        assert_eq!(
            err,
            PredictError::UnknownSymbol {
                symbol: "ZZZ9".to_string()
            }
        );
        assert_eq!(f.dataset.queries.load(Ordering::SeqCst), 0);
        assert!(f.model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn known_symbol_without_history_is_not_found() {
        let f = fixture(vec![ppl(1, 100.0)]);

        let err = f.service.predict(&request("MSFT")).await.unwrap_err();

        assert_eq!(
            err,
            PredictError::SymbolNotFound {
                symbol: "MSFT".to_string()
            }
        );
        assert!(f.model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_history_flags_defaulted_lags() {
        let f = fixture(vec![ppl(3, 101.0)]);

        let result = f.service.predict(&request("PPL")).await.unwrap();

        assert_eq!(result.defaulted_lags(), vec!["lag2", "lag3"]);
        assert_eq!(result.used_lags["lag2"].value, 101.0);
        assert_eq!(f.model.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_dataset_or_model() {
        let f = fixture(vec![ppl(1, 100.0)]);
        let mut req = request("PPL");
        req.volume = None;

        let err = f.service.predict(&req).await.unwrap_err();

        assert_eq!(err.fields().unwrap(), ["volume"]);
        assert_eq!(f.dataset.queries.load(Ordering::SeqCst), 0);
        assert!(f.model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scoring_failure_becomes_model_invocation_error() {
        let model = Arc::new(FailingModel::default());
        let service = PredictionService::new(
            Arc::new(SymbolEncoder::from_classes(["AAL", "AAPL", "MSFT", "PPL"]).unwrap()),
            Arc::new(CsvDataset::from_observations(vec![
                ppl(1, 100.0),
                ppl(2, 102.0),
                ppl(3, 101.0),
            ])),
            model.clone(),
            FeatureSchema::training_default(),
            LagPadding::RepeatLast,
        )
        .unwrap();

        let err = service.predict(&request("PPL")).await.unwrap_err();

        assert!(matches!(err, PredictError::ModelInvocation(ref msg) if msg.contains("non-finite")));
        assert!(!err.is_client_error());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_schema_that_disagrees_with_model() {
        let dataset = Arc::new(CsvDataset::default());
        let encoder = Arc::new(SymbolEncoder::from_classes(["PPL"]).unwrap());
        let schema = FeatureSchema::parse("Open,High", Default::default()).unwrap();

        let res = PredictionService::new(
            encoder,
            dataset,
            Arc::new(RecordingModel::default()),
            schema,
            LagPadding::RepeatLast,
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn concurrent_predictions_are_independent() {
        let f = fixture(vec![ppl(1, 100.0), ppl(2, 102.0), ppl(3, 101.0)]);
        let service = Arc::new(f.service);

        let mut handles = Vec::new();
        for day in 2..=4 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let mut req = request("PPL");
                req.date = d(day);
                service.predict(&req).await.map(|r| r.used_lags["lag1"].value)
            }));
        }

        let mut lag1 = Vec::new();
        for h in handles {
            lag1.push(h.await.unwrap().unwrap());
        }
        assert_eq!(lag1, vec![100.0, 102.0, 101.0]);
        assert_eq!(f.model.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn lists_union_of_vocabulary_and_dataset() {
        let mut rows = vec![ppl(1, 100.0)];
        rows.push(MarketObservation {
            symbol: "ZION".to_string(),
            ..ppl(1, 50.0)
        });
        let f = fixture(rows);

        let symbols = f.service.available_symbols().await.unwrap();
        assert_eq!(symbols, ["AAL", "AAPL", "MSFT", "PPL", "ZION"]);

        let row = f.service.lookup_observation("ppl", d(9)).await.unwrap().unwrap();
        assert_eq!(row.close, 100.0);
    }
}
