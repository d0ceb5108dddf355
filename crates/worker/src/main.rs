use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pricecast_core::pipeline::error::PipelineError;

mod render;

#[derive(Debug, Parser)]
#[command(name = "pricecast_worker")]
struct Args {
    /// Price history CSV with Date,Open,High,Low,Close,Volume columns.
    #[arg(long)]
    csv: PathBuf,

    /// Instrument name for the report. Defaults to the CSV file stem.
    #[arg(long)]
    instrument: Option<String>,

    /// Fraction of rows held out for testing. Defaults to PREDICT_TEST_SPLIT or 0.2.
    #[arg(long)]
    test_split: Option<f64>,

    /// Print the full report as JSON instead of tables.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = pricecast_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let instrument = match args.instrument.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => instrument_from_path(&args.csv)?,
    };

    let mut options = settings.pipeline_options();
    if let Some(v) = args.test_split {
        options.test_split = v;
    }

    let file = std::fs::File::open(&args.csv)
        .with_context(|| format!("failed to open {}", args.csv.display()))?;
    let rows = pricecast_core::ingest::price_csv::read_price_rows(std::io::BufReader::new(file))
        .with_context(|| format!("failed to read {}", args.csv.display()))?;
    tracing::info!(%instrument, rows = rows.len(), csv = %args.csv.display(), "loaded price rows");

    let report = match pricecast_core::pipeline::predict_rows(&instrument, &rows, options) {
        Ok(report) => report,
        Err(err) => {
            let input_error = err
                .downcast_ref::<PipelineError>()
                .is_some_and(PipelineError::is_input_error);
            if !input_error {
                sentry_anyhow::capture_anyhow(&err);
            }
            tracing::error!(%instrument, error = %format!("{err:#}"), "prediction run failed");
            return Err(err);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render::report_tables(&report));
    }

    Ok(())
}

fn instrument_from_path(path: &std::path::Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .context("cannot derive instrument name from CSV path; pass --instrument")
}

fn init_sentry(settings: &pricecast_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
