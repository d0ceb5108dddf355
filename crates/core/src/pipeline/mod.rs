//! Next-day close prediction over one instrument's daily history.
//!
//! Stages: min-max scale the full table, shift the close target one day ahead,
//! split positionally, fit the five regressors, map predictions back to price
//! units, score them and forecast the next business day.
//!
//! The scaler is fitted on the whole series before the split, so test-period
//! bounds influence training normalization. Fitting on the training rows only
//! would change every reported number; keep it as is unless that is intended.

pub mod error;
pub mod metrics;
pub mod scaler;
pub mod split;

use crate::domain::price::{PriceSeries, RawPriceRow};
use crate::domain::report::{EvaluationRow, ForecastRecord, PredictionReport, TestRow, TrainRow};
use crate::model::{FittedModel, ModelKind};
use crate::time::calendar::next_business_day;
use anyhow::Context;
use error::PipelineError;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use scaler::MinMaxScaler;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Table column order; the target comes first so features are `1..`.
pub const COLUMNS: [&str; 5] = ["close", "high", "low", "open", "volume"];
const CLOSE: usize = 0;

/// Fewest rows that still leave one training and one test row.
const ABSOLUTE_MIN_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub test_split: f64,
    pub min_rows: usize,
    /// Upper bound on usable rows. Each SVR fit holds a dense
    /// `train_len x train_len` kernel matrix.
    pub max_rows: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            test_split: 0.2,
            min_rows: 10,
            max_rows: 3_000,
        }
    }
}

pub fn predict_rows(
    instrument: &str,
    rows: &[RawPriceRow],
    options: PipelineOptions,
) -> anyhow::Result<PredictionReport> {
    predict_rows_cancellable(instrument, rows, options, &AtomicBool::new(false))
}

/// [`predict_rows`] that stops with `PipelineError::Cancelled` once `cancel` is set.
pub fn predict_rows_cancellable(
    instrument: &str,
    rows: &[RawPriceRow],
    options: PipelineOptions,
    cancel: &AtomicBool,
) -> anyhow::Result<PredictionReport> {
    let series = PriceSeries::from_raw_rows(instrument, rows)?;
    predict_cancellable(&series, options, cancel)
}

pub fn predict(series: &PriceSeries, options: PipelineOptions) -> anyhow::Result<PredictionReport> {
    predict_cancellable(series, options, &AtomicBool::new(false))
}

pub fn predict_cancellable(
    series: &PriceSeries,
    options: PipelineOptions,
    cancel: &AtomicBool,
) -> anyhow::Result<PredictionReport> {
    let test_split = options.test_split;
    if !(test_split > 0.0 && test_split < 1.0) {
        return Err(PipelineError::InvalidTestSplit { value: test_split }.into());
    }

    let required = options.min_rows.max(ABSOLUTE_MIN_ROWS);
    if series.len() < required {
        return Err(PipelineError::InsufficientData {
            required,
            actual: series.len(),
        }
        .into());
    }
    if series.len() > options.max_rows {
        return Err(PipelineError::TooManyRows {
            limit: options.max_rows,
            actual: series.len(),
        }
        .into());
    }

    let records = series.records();
    let dates: Vec<_> = records.iter().map(|r| r.date).collect();
    let table = Array2::from_shape_fn((records.len(), COLUMNS.len()), |(i, j)| {
        let r = &records[i];
        match j {
            0 => r.close,
            1 => r.high,
            2 => r.low,
            3 => r.open,
            _ => r.volume as f64,
        }
    });

    let scaler = MinMaxScaler::fit(table.view(), &COLUMNS)?;
    let scaled = scaler.transform(table.view());
    let split = split::next_day_split(scaled.view(), &dates, test_split);

    // No test rows means the fraction rounds to nothing at any length.
    if split.test_target.is_empty() {
        return Err(PipelineError::InvalidTestSplit { value: test_split }.into());
    }
    if split.train_target.is_empty() {
        // Smallest N with floor((N - 1) * (1 - test_split)) >= 1.
        let required = (1.0 / (1.0 - test_split)).ceil() as usize + 1;
        return Err(PipelineError::InsufficientData {
            required: required.max(series.len() + 1),
            actual: series.len(),
        }
        .into());
    }

    tracing::info!(
        instrument = series.instrument(),
        rows = records.len(),
        train_len = split.train_target.len(),
        test_len = split.test_target.len(),
        "split price series"
    );

    let mut fitted = Vec::with_capacity(ModelKind::ALL.len());
    for kind in ModelKind::ALL {
        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled.into());
        }
        let model = kind.fit(split.train_features.view(), split.train_target.view(), cancel)?;
        if let FittedModel::Svr(svr) = &model {
            tracing::debug!(
                model = kind.label(),
                support_vectors = svr.n_support(),
                iterations = svr.iterations(),
                "model fitted"
            );
        }
        fitted.push((kind, model));
    }

    let test_actual = inverse_rows(&scaler, split.test_target.view(), split.test_features.view())?;
    let mut test_table: Vec<TestRow> = split
        .test_dates
        .iter()
        .zip(test_actual.rows())
        .map(|(date, row)| TestRow {
            date: *date,
            close: row[0],
            high: row[1],
            low: row[2],
            open: row[3],
            volume: row[4],
            predictions: BTreeMap::new(),
        })
        .collect();

    for (kind, model) in &fitted {
        let scaled_pred = model
            .predict(split.test_features.view())
            .map_err(|e| PipelineError::prediction(*kind, e))?;
        let prices = to_price_units(*kind, &scaler, scaled_pred.view(), split.test_features.view())?;
        for (row, price) in test_table.iter_mut().zip(prices) {
            row.predictions.insert(*kind, price);
        }
    }

    test_table.sort_by(|a, b| b.date.cmp(&a.date));

    let evaluation = evaluate(&test_table)?;
    for e in &evaluation {
        tracing::info!(model = %e.name, mape = e.mape, rmse = e.rmse, "model evaluated");
    }

    let train_inverse =
        inverse_rows(&scaler, split.train_target.view(), split.train_features.view())?;
    let train_table = split
        .train_dates
        .iter()
        .zip(train_inverse.rows())
        .map(|(date, row)| TrainRow {
            date: *date,
            close: row[0],
            high: row[1],
            low: row[2],
            open: row[3],
            volume: row[4],
        })
        .collect();

    let forecast = forecast_next_day(series, &scaler, scaled.view(), &fitted)?;
    tracing::info!(
        instrument = series.instrument(),
        date = %forecast.date,
        "next business day forecast ready"
    );

    Ok(PredictionReport {
        instrument: series.instrument().to_string(),
        test_split,
        train_table,
        test_table,
        evaluation,
        forecast,
    })
}

/// Stacks a close column with its feature rows and maps the result to price units.
fn inverse_rows(
    scaler: &MinMaxScaler,
    close: ArrayView1<'_, f64>,
    features: ArrayView2<'_, f64>,
) -> anyhow::Result<Array2<f64>> {
    let stacked = concatenate(Axis(1), &[close.insert_axis(Axis(1)).view(), features.view()])
        .context("close column does not match feature rows")?;
    Ok(scaler.inverse_transform(stacked.view()))
}

/// Inverse-scales predicted closes and rounds them to whole price units.
fn to_price_units(
    kind: ModelKind,
    scaler: &MinMaxScaler,
    predicted: ArrayView1<'_, f64>,
    features: ArrayView2<'_, f64>,
) -> Result<Vec<i64>, PipelineError> {
    let prices = inverse_rows(scaler, predicted, features)
        .map_err(|e| PipelineError::prediction(kind, e))?;

    prices
        .column(CLOSE)
        .iter()
        .map(|v| {
            let rounded = v.round_ties_even();
            if rounded.is_finite() && rounded.abs() < i64::MAX as f64 {
                Ok(rounded as i64)
            } else {
                Err(PipelineError::prediction(kind, format!("prediction {v} is out of range")))
            }
        })
        .collect()
}

fn evaluate(test_table: &[TestRow]) -> Result<Vec<EvaluationRow>, PipelineError> {
    let actual: Vec<f64> = test_table.iter().map(|r| r.close).collect();

    ModelKind::ALL
        .iter()
        .map(|&kind| {
            let predicted: Vec<f64> = test_table
                .iter()
                .map(|r| r.predictions.get(&kind).copied().unwrap_or_default() as f64)
                .collect();
            let mape = metrics::mean_absolute_percentage_error(&actual, &predicted)
                .map_err(|e| PipelineError::prediction(kind, e))?;
            let rmse = metrics::root_mean_squared_error(&actual, &predicted)
                .map_err(|e| PipelineError::prediction(kind, e))?;
            Ok(EvaluationRow {
                model: kind,
                name: kind.label().to_string(),
                mape,
                rmse,
            })
        })
        .collect()
}

fn forecast_next_day(
    series: &PriceSeries,
    scaler: &MinMaxScaler,
    scaled: ArrayView2<'_, f64>,
    fitted: &[(ModelKind, FittedModel)],
) -> Result<ForecastRecord, PipelineError> {
    let last = scaled.nrows() - 1;
    let features = scaled.slice(s![last..=last, 1..]);

    let mut predictions = BTreeMap::new();
    for (kind, model) in fitted {
        let scaled_pred: Array1<f64> = model
            .predict(features)
            .map_err(|e| PipelineError::prediction(*kind, e))?;
        let price = to_price_units(*kind, scaler, scaled_pred.view(), features)?;
        predictions.insert(*kind, price[0]);
    }

    let last_date = series
        .last()
        .map(|r| r.date)
        .ok_or(PipelineError::InsufficientData { required: 1, actual: 0 })?;

    Ok(ForecastRecord {
        date: next_business_day(last_date),
        predictions,
    })
}
