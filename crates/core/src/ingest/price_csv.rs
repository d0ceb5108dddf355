//! Reads `Date,Open,High,Low,Close,Volume` price exports into raw rows.

use crate::domain::price::{RawPriceRow, REQUIRED_FIELDS};
use crate::pipeline::error::PipelineError;
use anyhow::Context;
use chrono::NaiveDate;
use std::io::Read;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Header names are matched case-insensitively. A header without one of the six
/// columns fails with `MissingField`; a blank or unparsable cell only clears that
/// field of its row.
pub fn read_price_rows<R: Read>(reader: R) -> anyhow::Result<Vec<RawPriceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    let mut idx = [0usize; 6];
    for (slot, field) in idx.iter_mut().zip(REQUIRED_FIELDS) {
        *slot = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(field))
            .ok_or(PipelineError::MissingField { field })?;
    }
    let [date_i, open_i, high_i, low_i, close_i, volume_i] = idx;

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV record {}", line + 1))?;
        let cell = |i: usize| record.get(i).map(str::trim).filter(|s| !s.is_empty());

        rows.push(RawPriceRow {
            date: cell(date_i).and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok()),
            open: cell(open_i).and_then(parse_price),
            high: cell(high_i).and_then(parse_price),
            low: cell(low_i).and_then(parse_price),
            close: cell(close_i).and_then(parse_price),
            volume: cell(volume_i).and_then(parse_volume),
        });
    }

    tracing::debug!(rows = rows.len(), "parsed price CSV");
    Ok(rows)
}

pub fn read_price_rows_from_str(text: &str) -> anyhow::Result<Vec<RawPriceRow>> {
    read_price_rows(text.as_bytes())
}

fn parse_price(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Volume exports sometimes carry a trailing `.0`.
fn parse_volume(s: &str) -> Option<u64> {
    if let Ok(v) = s.parse::<u64>() {
        return Some(v);
    }
    let v = s.parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64).then_some(v as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_export() {
        let text = "Date,Open,High,Low,Close,Volume\n\
                    2024-01-02,100.5,102,99,101.25,12000\n\
                    2024-01-03,101,103.5,100,103,15000.0\n";
        let rows = read_price_rows_from_str(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(rows[0].close, Some(101.25));
        assert_eq!(rows[1].volume, Some(15000));
    }

    #[test]
    fn header_is_case_insensitive_and_order_free() {
        let text = "volume , close,LOW,high,open,date\n5,1,1,2,1.5,2024-02-01\n";
        let rows = read_price_rows_from_str(text).unwrap();
        assert_eq!(rows[0].high, Some(2.0));
        assert_eq!(rows[0].volume, Some(5));
    }

    #[test]
    fn blank_cells_become_none() {
        let text = "Date,Open,High,Low,Close,Volume\n2024-01-02,1,2,0.5,1.5,\n2024-01-03,1,2,0.5,null,10\n";
        let rows = read_price_rows_from_str(text).unwrap();
        assert_eq!(rows[0].volume, None);
        assert_eq!(rows[1].close, None);
        assert_eq!(rows[1].volume, Some(10));
    }

    #[test]
    fn missing_column_is_reported() {
        let text = "Date,Open,High,Low,Close\n2024-01-02,1,2,0.5,1.5\n";
        let err = read_price_rows_from_str(text).unwrap_err();
        let err = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(*err, PipelineError::MissingField { field: "volume" });
    }

    #[test]
    fn rejects_fractional_volume() {
        assert_eq!(parse_volume("12.5"), None);
        assert_eq!(parse_volume("-3"), None);
        assert_eq!(parse_volume("7"), Some(7));
    }
}
