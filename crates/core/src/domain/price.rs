use crate::pipeline::error::PipelineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One row as delivered by a caller. Any field may be absent; incomplete rows are
/// dropped when the series is built, never rejected at parse time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPriceRow {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceRecord {
    /// Returns `None` when any required field is missing or not finite.
    pub fn from_raw(row: &RawPriceRow) -> Option<Self> {
        let record = Self {
            date: row.date?,
            open: row.open?,
            high: row.high?,
            low: row.low?,
            close: row.close?,
            volume: row.volume?,
        };
        let finite = [record.open, record.high, record.low, record.close]
            .iter()
            .all(|v| v.is_finite());
        finite.then_some(record)
    }
}

/// Field names in the order a CSV header lists them.
pub const REQUIRED_FIELDS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// Usable daily history for one instrument, ascending by date, no duplicate dates.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSeries {
    instrument: String,
    records: Vec<PriceRecord>,
}

impl PriceSeries {
    pub fn from_records(
        instrument: impl Into<String>,
        mut records: Vec<PriceRecord>,
    ) -> anyhow::Result<Self> {
        records.sort_by_key(|r| r.date);

        let mut seen = BTreeSet::new();
        for r in &records {
            if !seen.insert(r.date) {
                return Err(PipelineError::DuplicateDate { date: r.date }.into());
            }
        }

        Ok(Self {
            instrument: instrument.into(),
            records,
        })
    }

    /// Drops incomplete rows, then sorts and validates what is left.
    ///
    /// A field that is absent from every row is reported as `MissingField` rather
    /// than silently discarding the whole input.
    pub fn from_raw_rows(instrument: impl Into<String>, rows: &[RawPriceRow]) -> anyhow::Result<Self> {
        if !rows.is_empty() {
            if let Some(field) = field_absent_everywhere(rows) {
                return Err(PipelineError::MissingField { field }.into());
            }
        }

        let records: Vec<PriceRecord> = rows.iter().filter_map(PriceRecord::from_raw).collect();
        let dropped = rows.len() - records.len();
        if dropped > 0 {
            tracing::debug!(dropped, kept = records.len(), "dropped incomplete price rows");
        }

        Self::from_records(instrument, records)
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&PriceRecord> {
        self.records.last()
    }
}

fn field_absent_everywhere(rows: &[RawPriceRow]) -> Option<&'static str> {
    let checks: [(&'static str, fn(&RawPriceRow) -> bool); 6] = [
        ("date", |r| r.date.is_some()),
        ("open", |r| r.open.is_some()),
        ("high", |r| r.high.is_some()),
        ("low", |r| r.low.is_some()),
        ("close", |r| r.close.is_some()),
        ("volume", |r| r.volume.is_some()),
    ];
    checks
        .iter()
        .find(|(_, present)| !rows.iter().any(present))
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(day: u32, volume: Option<u64>) -> RawPriceRow {
        RawPriceRow {
            date: NaiveDate::from_ymd_opt(2024, 3, day),
            open: Some(10.0),
            high: Some(11.0),
            low: Some(9.0),
            close: Some(10.5),
            volume,
        }
    }

    #[test]
    fn drops_rows_missing_volume() {
        let rows = vec![row(1, Some(100)), row(2, None), row(3, Some(300))];
        let series = PriceSeries::from_raw_rows("TEST", &rows).unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.records().iter().all(|r| r.volume > 0));
    }

    #[test]
    fn sorts_ascending_by_date() {
        let rows = vec![row(5, Some(1)), row(2, Some(2)), row(3, Some(3))];
        let series = PriceSeries::from_raw_rows("TEST", &rows).unwrap();
        let days: Vec<_> = series.records().iter().map(|r| r.date).collect();
        let mut sorted = days.clone();
        sorted.sort();
        assert_eq!(days, sorted);
    }

    #[test]
    fn rejects_duplicate_dates() {
        let rows = vec![row(1, Some(1)), row(1, Some(2))];
        let err = PriceSeries::from_raw_rows("TEST", &rows).unwrap_err();
        let err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::DuplicateDate { .. }));
    }

    #[test]
    fn reports_field_missing_from_every_row() {
        let rows = vec![row(1, None), row(2, None)];
        let err = PriceSeries::from_raw_rows("TEST", &rows).unwrap_err();
        let err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::MissingField { field: "volume" }));
    }

    #[test]
    fn rejects_non_finite_prices() {
        let mut r = row(1, Some(1));
        r.close = Some(f64::NAN);
        assert!(PriceRecord::from_raw(&r).is_none());
    }
}
