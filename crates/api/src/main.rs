use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pricecast_core::domain::price::RawPriceRow;
use pricecast_core::domain::report::PredictionReport;
use pricecast_core::pipeline::error::PipelineError;
use pricecast_core::pipeline::PipelineOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = pricecast_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let app = router(AppState::from_settings(&settings), settings.max_body_bytes);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/predict", post(predict_json))
        .route("/v1/predict/csv", post(predict_csv))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    options: PipelineOptions,
    timeout: Duration,
}

impl AppState {
    fn from_settings(settings: &pricecast_core::config::Settings) -> Self {
        Self {
            options: settings.pipeline_options(),
            timeout: Duration::from_secs(settings.predict_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    instrument: String,
    test_split: Option<f64>,
    rows: Vec<RawPriceRow>,
}

#[derive(Debug, Deserialize)]
struct CsvParams {
    instrument: String,
    test_split: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ApiReport {
    report_id: Uuid,
    generated_at: DateTime<Utc>,
    report: PredictionReport,
}

type ApiError = (StatusCode, String);

async fn predict_json(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<ApiReport>, ApiError> {
    run_prediction(&state, req.instrument, req.test_split, req.rows).await
}

async fn predict_csv(
    State(state): State<AppState>,
    Query(params): Query<CsvParams>,
    body: String,
) -> Result<Json<ApiReport>, ApiError> {
    let rows = pricecast_core::ingest::price_csv::read_price_rows_from_str(&body)
        .map_err(error_response)?;
    run_prediction(&state, params.instrument, params.test_split, rows).await
}

async fn run_prediction(
    state: &AppState,
    instrument: String,
    test_split: Option<f64>,
    rows: Vec<RawPriceRow>,
) -> Result<Json<ApiReport>, ApiError> {
    let instrument = instrument.trim().to_string();
    if instrument.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "instrument must be non-empty".to_string()));
    }

    let mut options = state.options;
    if let Some(v) = test_split {
        options.test_split = v;
    }

    let t0 = std::time::Instant::now();
    let cancel = Arc::new(AtomicBool::new(false));
    let task = {
        let cancel = Arc::clone(&cancel);
        tokio::task::spawn_blocking(move || {
            pricecast_core::pipeline::predict_rows_cancellable(&instrument, &rows, options, &cancel)
        })
    };

    let report = match tokio::time::timeout(state.timeout, task).await {
        Ok(Ok(result)) => result.map_err(error_response)?,
        Ok(Err(join_err)) => {
            let err = anyhow::Error::new(join_err).context("prediction task panicked");
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "prediction task failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "prediction failed".to_string()));
        }
        Err(_) => {
            // Stops the blocking fit at its next cancellation check.
            cancel.store(true, Ordering::Relaxed);
            tracing::warn!(timeout_secs = state.timeout.as_secs(), "prediction timed out");
            return Err((StatusCode::GATEWAY_TIMEOUT, "prediction timed out".to_string()));
        }
    };

    let report_id = Uuid::new_v4();
    tracing::info!(
        %report_id,
        instrument = %report.instrument,
        elapsed_ms = t0.elapsed().as_millis(),
        "prediction report generated"
    );

    Ok(Json(ApiReport {
        report_id,
        generated_at: Utc::now(),
        report,
    }))
}

fn error_response(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<PipelineError>() {
        Some(e) if e.is_input_error() => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        Some(PipelineError::Cancelled) => {
            (StatusCode::GATEWAY_TIMEOUT, "prediction timed out".to_string())
        }
        Some(e) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %e, "prediction failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        None => (StatusCode::BAD_REQUEST, format!("{err:#}")),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CLOSES: [f64; 15] = [
        100.0, 102.0, 101.0, 105.0, 107.0, 106.0, 110.0, 108.0, 112.0, 115.0, 111.0, 117.0, 119.0,
        116.0, 120.0,
    ];

    fn test_app() -> Router {
        app_with(PipelineOptions::default(), Duration::from_secs(30))
    }

    fn app_with(options: PipelineOptions, timeout: Duration) -> Router {
        router(AppState { options, timeout }, 1024 * 1024)
    }

    fn csv_body() -> String {
        csv_from_closes(&CLOSES)
    }

    fn csv_from_closes(closes: &[f64]) -> String {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut out = String::from("Date,Open,High,Low,Close,Volume\n");
        for (i, close) in closes.iter().enumerate() {
            let date = start + chrono::Duration::days(i as i64);
            out.push_str(&format!(
                "{date},{},{},{},{close},{}\n",
                close - 1.0 + (i % 3) as f64 * 0.5,
                close + 2.0 + (i % 2) as f64,
                close - 2.0 - (i % 4) as f64 * 0.25,
                10_000 + (i * 7919) % 5_000,
            ));
        }
        out
    }

    fn json_rows(closes: &[f64]) -> Vec<Value> {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                json!({
                    "date": (start + chrono::Duration::days(i as i64)).to_string(),
                    "open": close - 1.0 + (i % 3) as f64 * 0.5,
                    "high": close + 2.0 + (i % 2) as f64,
                    "low": close - 2.0 - (i % 4) as f64 * 0.25,
                    "close": close,
                    "volume": 10_000 + (i * 7919) % 5_000,
                })
            })
            .collect()
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::post("/v1/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(res: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_responds_ok() {
        let res = test_app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn csv_upload_returns_report() {
        let req = Request::post("/v1/predict/csv?instrument=DEMO&test_split=0.2")
            .header(header::CONTENT_TYPE, "text/csv")
            .body(Body::from(csv_body()))
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let v = body_json(res).await;
        assert_eq!(v["report"]["instrument"], "DEMO");
        assert_eq!(v["report"]["train_table"].as_array().unwrap().len(), 11);
        assert_eq!(v["report"]["test_table"].as_array().unwrap().len(), 3);
        assert_eq!(v["report"]["evaluation"].as_array().unwrap().len(), 5);
        assert_eq!(v["report"]["forecast"]["date"], "2024-01-16");
        assert!(v["report"]["forecast"]["predictions"]["svr_rbf"].is_i64());
    }

    #[tokio::test]
    async fn json_rows_with_too_little_data_are_unprocessable() {
        let rows: Vec<Value> = (1..=5)
            .map(|d| {
                json!({
                    "date": format!("2024-02-0{d}"),
                    "open": 10.0, "high": 11.0, "low": 9.0, "close": 10.0 + d as f64,
                    "volume": 100 * d,
                })
            })
            .collect();
        let body = json!({ "instrument": "TINY", "rows": rows }).to_string();
        let req = Request::post("/v1/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn csv_without_volume_column_is_unprocessable() {
        let req = Request::post("/v1/predict/csv?instrument=DEMO")
            .body(Body::from("Date,Open,High,Low,Close\n2024-01-02,1,2,0.5,1.5\n"))
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn blank_instrument_is_rejected() {
        let body = json!({ "instrument": "  ", "rows": [] }).to_string();
        let req = Request::post("/v1/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let res = test_app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn json_rows_return_report() {
        let body = json!({ "instrument": "DEMO", "test_split": 0.2, "rows": json_rows(&CLOSES) });
        let res = test_app().oneshot(post_json(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let v = body_json(res).await;
        assert!(v["report_id"].as_str().is_some_and(|id| Uuid::parse_str(id).is_ok()));
        assert_eq!(v["report"]["test_table"].as_array().unwrap().len(), 3);
        assert_eq!(v["report"]["test_table"][0]["date"], "2024-01-15");
        assert_eq!(v["report"]["forecast"]["date"], "2024-01-16");
        assert_eq!(
            v["report"]["forecast"]["predictions"].as_object().unwrap().len(),
            5
        );
    }

    #[tokio::test]
    async fn zero_actual_close_is_a_server_error() {
        let mut closes = CLOSES.to_vec();
        *closes.last_mut().unwrap() = 0.0;
        let body = json!({ "instrument": "ZERO", "rows": json_rows(&closes) });
        let res = test_app().oneshot(post_json(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn slow_prediction_times_out() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + (i as f64 * 0.37).sin() * 8.0 + i as f64 * 0.2)
            .collect();
        let app = app_with(PipelineOptions::default(), Duration::ZERO);
        let req = Request::post("/v1/predict/csv?instrument=SLOW")
            .body(Body::from(csv_from_closes(&closes)))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn oversized_series_is_unprocessable() {
        let options = PipelineOptions {
            max_rows: 12,
            ..PipelineOptions::default()
        };
        let app = app_with(options, Duration::from_secs(30));
        let body = json!({ "instrument": "BIG", "rows": json_rows(&CLOSES) });
        let res = app.oneshot(post_json(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
