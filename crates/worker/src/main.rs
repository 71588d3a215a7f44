use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stockcast_core::config::Settings;
use stockcast_core::domain::prediction::PredictionRequest;
use stockcast_core::service::PredictionService;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ingest;

#[derive(Debug, Parser)]
#[command(name = "stockcast_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a CSV dataset into market_observations.
    IngestCsv {
        #[arg(long)]
        path: Option<PathBuf>,

        /// Parse and validate without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Check encoder, model, feature order and dataset against each other.
    Verify,

    /// Score a single request and print the result as JSON.
    Predict {
        #[arg(long)]
        symbol: String,
        /// YYYY-MM-DD. Defaults to today's UTC date.
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        open: f64,
        #[arg(long)]
        high: f64,
        #[arg(long)]
        low: f64,
        #[arg(long)]
        volume: f64,
        #[arg(long)]
        close: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = match args.command {
        Command::IngestCsv { path, dry_run } => {
            let path = path.unwrap_or_else(|| settings.dataset_path());
            ingest::ingest_csv(&settings, &path, dry_run).await
        }
        Command::Verify => verify(&settings).await,
        Command::Predict {
            symbol,
            date,
            open,
            high,
            low,
            volume,
            close,
        } => {
            let date = match date.as_deref() {
                Some(s) => stockcast_core::domain::observation::parse_date(s)
                    .with_context(|| format!("invalid --date: {s}"))?,
                None => chrono::Utc::now().date_naive(),
            };
            let request = PredictionRequest {
                date,
                symbol,
                open: Some(open),
                high: Some(high),
                low: Some(low),
                volume: Some(volume),
                close,
            };
            predict_once(&settings, &request).await
        }
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = ?err, "worker run failed");
    }
    res
}

async fn verify(settings: &Settings) -> anyhow::Result<()> {
    let service = PredictionService::from_settings(settings).await?;

    let symbols = service.dataset().symbols().await?;
    let outside: Vec<&String> = symbols
        .iter()
        .filter(|s| !service.encoder().contains(s))
        .collect();
    if !outside.is_empty() {
        tracing::warn!(
            count = outside.len(),
            sample = ?outside.iter().take(10).collect::<Vec<_>>(),
            "dataset symbols outside the model vocabulary cannot be predicted"
        );
    }

    tracing::info!(
        model = service.model().name(),
        features = service.schema().len(),
        vocabulary = service.encoder().len(),
        dataset_symbols = symbols.len(),
        "artifacts verified"
    );
    Ok(())
}

async fn predict_once(settings: &Settings, request: &PredictionRequest) -> anyhow::Result<()> {
    let service = PredictionService::from_settings(settings).await?;
    let result = service.predict(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
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
