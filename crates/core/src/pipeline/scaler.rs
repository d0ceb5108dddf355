use crate::pipeline::error::PipelineError;
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Per-column min-max scaler onto [0, 1]. Keeps the fitted bounds so scaled values
/// can be mapped back to price units.
#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    min: Array1<f64>,
    max: Array1<f64>,
}

impl MinMaxScaler {
    /// `columns` names each column of `x` for error reporting.
    pub fn fit(x: ArrayView2<'_, f64>, columns: &[&'static str]) -> Result<Self, PipelineError> {
        debug_assert_eq!(x.ncols(), columns.len());

        let mut min = Array1::zeros(x.ncols());
        let mut max = Array1::zeros(x.ncols());
        for (j, col) in x.axis_iter(Axis(1)).enumerate() {
            let lo = col.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = col.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if hi <= lo {
                return Err(PipelineError::Scaling { column: columns[j] });
            }
            min[j] = lo;
            max[j] = hi;
        }

        Ok(Self { min, max })
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.axis_iter_mut(Axis(0)) {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.min[j]) / self.range(j);
            }
        }
        out
    }

    pub fn inverse_transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.axis_iter_mut(Axis(0)) {
            for (j, v) in row.iter_mut().enumerate() {
                *v = *v * self.range(j) + self.min[j];
            }
        }
        out
    }

    fn range(&self, j: usize) -> f64 {
        self.max[j] - self.min[j]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const COLS: [&str; 2] = ["a", "b"];

    #[test]
    fn scales_each_column_into_unit_range() {
        let x = array![[10.0, 1_000.0], [20.0, 3_000.0], [15.0, 2_000.0]];
        let scaler = MinMaxScaler::fit(x.view(), &COLS).unwrap();
        let scaled = scaler.transform(x.view());
        assert_eq!(scaled, array![[0.0, 0.0], [1.0, 1.0], [0.5, 0.5]]);
    }

    #[test]
    fn inverse_transform_round_trips() {
        let x = array![[101.3, 12_345.0], [99.7, 8_000.0], [120.25, 15_001.0], [100.0, 9_999.0]];
        let scaler = MinMaxScaler::fit(x.view(), &COLS).unwrap();
        let back = scaler.inverse_transform(scaler.transform(x.view()).view());
        for (a, b) in x.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6, "{a} != {b}");
        }
    }

    #[test]
    fn rejects_constant_column() {
        let x = array![[1.0, 5.0], [2.0, 5.0]];
        let err = MinMaxScaler::fit(x.view(), &COLS).unwrap_err();
        assert_eq!(err, PipelineError::Scaling { column: "b" });
    }
}
