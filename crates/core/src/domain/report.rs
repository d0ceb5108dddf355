use crate::model::ModelKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything one pipeline run produces, in original price units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionReport {
    pub instrument: String,
    pub test_split: f64,
    pub train_table: Vec<TrainRow>,
    /// Most recent date first.
    pub test_table: Vec<TestRow>,
    pub evaluation: Vec<EvaluationRow>,
    pub forecast: ForecastRecord,
}

/// `close` is the next-day close the row was trained against; the other columns are
/// the same-day features. `date` is the day `close` belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRow {
    pub date: NaiveDate,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRow {
    pub date: NaiveDate,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub volume: f64,
    pub predictions: BTreeMap<ModelKind, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRow {
    pub model: ModelKind,
    pub name: String,
    pub mape: f64,
    pub rmse: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub date: NaiveDate,
    pub predictions: BTreeMap<ModelKind, i64>,
}
