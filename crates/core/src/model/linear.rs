//! Ordinary least squares with an intercept.

use anyhow::{bail, ensure};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Added to the diagonal of X'X so nearly collinear price columns stay solvable.
const RIDGE: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct LinearRegression {
    pub coefficients: Array1<f64>,
    pub intercept: f64,
}

impl LinearRegression {
    /// Solves the normal equations on centered data, so the intercept is
    /// `mean(y) - mean(X) . beta`.
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> anyhow::Result<Self> {
        ensure!(
            x.nrows() == y.len(),
            "dimension mismatch: {} feature rows vs {} targets",
            x.nrows(),
            y.len()
        );
        ensure!(x.nrows() > 0, "cannot fit linear regression on an empty training set");

        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let y_mean = y.mean().unwrap_or(0.0);

        let xc = &x - &x_mean;
        let yc = &y - y_mean;

        let mut xtx = xc.t().dot(&xc);
        for i in 0..xtx.nrows() {
            xtx[[i, i]] += RIDGE;
        }
        let xty = xc.t().dot(&yc);

        let coefficients = cholesky_solve(&xtx, &xty)?;
        let intercept = y_mean - x_mean.dot(&coefficients);
        ensure!(
            intercept.is_finite() && coefficients.iter().all(|c| c.is_finite()),
            "least squares produced non-finite coefficients"
        );

        Ok(Self {
            coefficients,
            intercept,
        })
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array1<f64>> {
        ensure!(
            x.ncols() == self.coefficients.len(),
            "expected {} features, got {}",
            self.coefficients.len(),
            x.ncols()
        );
        Ok(x.dot(&self.coefficients) + self.intercept)
    }
}

/// Solves `a * x = b` for symmetric positive definite `a`.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> anyhow::Result<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    bail!("normal equations are singular");
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }

    Ok(x)
}
