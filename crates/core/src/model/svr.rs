//! Epsilon support vector regression.
//!
//! The dual problem is solved with SMO using second-order working set selection
//! (the libsvm formulation: `2l` box-constrained variables, one equality
//! constraint). No shrinking, so a fit is a pure function of its inputs.
//!
//! The full `l x l` kernel matrix is kept in memory, so callers bound `l`.

use anyhow::{bail, ensure, Context};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::sync::atomic::{AtomicBool, Ordering};

const TAU: f64 = 1e-12;

/// SMO iterations between two reads of the cancellation flag.
const CANCEL_CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Rbf,
    Linear,
    Poly,
    Sigmoid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvrParams {
    pub kernel: Kernel,
    pub c: f64,
    pub epsilon: f64,
    /// `None` derives gamma from the training data: `1 / (n_features * var(X))`.
    pub gamma: Option<f64>,
    pub degree: i32,
    pub coef0: f64,
    /// Stopping tolerance on the maximal KKT violation.
    pub tol: f64,
}

impl SvrParams {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            c: 1.0,
            epsilon: 0.1,
            gamma: None,
            degree: 3,
            coef0: 0.0,
            tol: 1e-3,
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct KernelFn {
    kernel: Kernel,
    gamma: f64,
    degree: i32,
    coef0: f64,
}

impl KernelFn {
    fn eval(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        match self.kernel {
            Kernel::Linear => a.dot(&b),
            Kernel::Poly => (self.gamma * a.dot(&b) + self.coef0).powi(self.degree),
            Kernel::Rbf => {
                let dist2: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
                (-self.gamma * dist2).exp()
            }
            Kernel::Sigmoid => (self.gamma * a.dot(&b) + self.coef0).tanh(),
        }
    }
}

/// A fitted regressor: support vectors with their dual coefficients and the bias.
#[derive(Debug, Clone)]
pub struct Svr {
    kernel: KernelFn,
    support_vectors: Array2<f64>,
    dual_coef: Array1<f64>,
    rho: f64,
    iterations: usize,
}

impl Svr {
    pub fn fit(params: SvrParams, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> anyhow::Result<Self> {
        Self::fit_cancellable(params, x, y, &AtomicBool::new(false))
    }

    /// Like [`Svr::fit`], but gives up with an error once `cancel` is set.
    pub fn fit_cancellable(
        params: SvrParams,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        cancel: &AtomicBool,
    ) -> anyhow::Result<Self> {
        ensure!(
            x.nrows() == y.len(),
            "dimension mismatch: {} feature rows vs {} targets",
            x.nrows(),
            y.len()
        );
        ensure!(x.nrows() > 0, "cannot fit SVR on an empty training set");
        ensure!(params.c > 0.0, "C must be positive (got {})", params.c);
        ensure!(params.epsilon >= 0.0, "epsilon must be non-negative (got {})", params.epsilon);

        let gamma = params.gamma.unwrap_or_else(|| scale_gamma(x));
        let kernel = KernelFn {
            kernel: params.kernel,
            gamma,
            degree: params.degree,
            coef0: params.coef0,
        };

        let mut solver = Solver::new(kernel, x, y, params.c, params.epsilon);
        let iterations = solver.run(params.tol, cancel)?;
        let rho = solver.rho();

        let l = x.nrows();
        let mut sv_rows = Vec::new();
        let mut coefs = Vec::new();
        for i in 0..l {
            let coef = solver.alpha[i] - solver.alpha[i + l];
            if coef != 0.0 {
                sv_rows.push(i);
                coefs.push(coef);
            }
        }

        let support_vectors = x.select(ndarray::Axis(0), &sv_rows);
        tracing::trace!(
            kernel = ?params.kernel,
            gamma,
            rho,
            iterations,
            support_vectors = sv_rows.len(),
            "svr fitted"
        );

        Ok(Self {
            kernel,
            support_vectors,
            dual_coef: Array1::from(coefs),
            rho,
            iterations,
        })
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array1<f64>> {
        ensure!(
            x.ncols() == self.support_vectors.ncols() || self.support_vectors.nrows() == 0,
            "expected {} features, got {}",
            self.support_vectors.ncols(),
            x.ncols()
        );

        x.rows()
            .into_iter()
            .map(|row| {
                let sum: f64 = self
                    .support_vectors
                    .rows()
                    .into_iter()
                    .zip(self.dual_coef.iter())
                    .map(|(sv, coef)| coef * self.kernel.eval(sv, row))
                    .sum();
                let v = sum - self.rho;
                ensure!(v.is_finite(), "non-finite SVR output");
                Ok(v)
            })
            .collect::<anyhow::Result<Vec<f64>>>()
            .map(Array1::from)
            .context("svr predict failed")
    }

    pub fn n_support(&self) -> usize {
        self.dual_coef.len()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// `1 / (n_features * var(X))` over every element of `x`; 1.0 when `x` is constant.
fn scale_gamma(x: ArrayView2<'_, f64>) -> f64 {
    let n = x.len() as f64;
    let mean = x.sum() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if var == 0.0 {
        1.0
    } else {
        1.0 / (x.ncols() as f64 * var)
    }
}

/// Dual variables `alpha[0..l]` are the upper-tube multipliers (sign +1) and
/// `alpha[l..2l]` the lower-tube ones (sign -1).
struct Solver {
    l: usize,
    kernel_matrix: Array2<f64>,
    sign: Vec<f64>,
    alpha: Vec<f64>,
    grad: Vec<f64>,
    c: f64,
}

impl Solver {
    fn new(
        kernel: KernelFn,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        c: f64,
        epsilon: f64,
    ) -> Self {
        let l = x.nrows();
        let mut kernel_matrix = Array2::zeros((l, l));
        for i in 0..l {
            for j in i..l {
                let v = kernel.eval(x.row(i), x.row(j));
                kernel_matrix[[i, j]] = v;
                kernel_matrix[[j, i]] = v;
            }
        }

        let mut sign = vec![1.0; 2 * l];
        let mut grad = vec![0.0; 2 * l];
        for i in 0..l {
            sign[i + l] = -1.0;
            // alpha starts at zero, so the gradient equals the linear term.
            grad[i] = epsilon - y[i];
            grad[i + l] = epsilon + y[i];
        }

        Self {
            l,
            kernel_matrix,
            sign,
            alpha: vec![0.0; 2 * l],
            grad,
            c,
        }
    }

    fn q(&self, i: usize, j: usize) -> f64 {
        self.sign[i] * self.sign[j] * self.kernel_matrix[[i % self.l, j % self.l]]
    }

    fn qd(&self, i: usize) -> f64 {
        let k = i % self.l;
        self.kernel_matrix[[k, k]]
    }

    fn is_upper_bound(&self, i: usize) -> bool {
        self.alpha[i] >= self.c
    }

    fn is_lower_bound(&self, i: usize) -> bool {
        self.alpha[i] <= 0.0
    }

    /// Returns the number of iterations performed.
    fn run(&mut self, tol: f64, cancel: &AtomicBool) -> anyhow::Result<usize> {
        let n = 2 * self.l;
        let max_iter = 10_000_000usize.max(n.saturating_mul(100));
        let mut iter = 0;

        while let Some((i, j)) = self.select_working_set(tol) {
            if iter >= max_iter {
                tracing::warn!(max_iter, "svr solver reached iteration limit");
                break;
            }
            if iter % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                bail!("svr fit cancelled after {iter} iterations");
            }
            iter += 1;
            self.update_pair(i, j);
        }

        Ok(iter)
    }

    fn select_working_set(&self, tol: f64) -> Option<(usize, usize)> {
        let n = 2 * self.l;

        let mut gmax = f64::NEG_INFINITY;
        let mut gmax_idx = None;
        for t in 0..n {
            if self.sign[t] > 0.0 {
                if !self.is_upper_bound(t) && -self.grad[t] >= gmax {
                    gmax = -self.grad[t];
                    gmax_idx = Some(t);
                }
            } else if !self.is_lower_bound(t) && self.grad[t] >= gmax {
                gmax = self.grad[t];
                gmax_idx = Some(t);
            }
        }
        let i = gmax_idx?;

        let mut gmax2 = f64::NEG_INFINITY;
        let mut gmin_idx = None;
        let mut obj_diff_min = f64::INFINITY;
        for j in 0..n {
            let candidate = if self.sign[j] > 0.0 {
                if self.is_lower_bound(j) {
                    continue;
                }
                gmax2 = gmax2.max(self.grad[j]);
                let grad_diff = gmax + self.grad[j];
                let quad = self.qd(i) + self.qd(j) - 2.0 * self.sign[i] * self.q(i, j);
                (grad_diff, quad)
            } else {
                if self.is_upper_bound(j) {
                    continue;
                }
                gmax2 = gmax2.max(-self.grad[j]);
                let grad_diff = gmax - self.grad[j];
                let quad = self.qd(i) + self.qd(j) + 2.0 * self.sign[i] * self.q(i, j);
                (grad_diff, quad)
            };

            let (grad_diff, quad) = candidate;
            if grad_diff > 0.0 {
                let quad = if quad > 0.0 { quad } else { TAU };
                let obj_diff = -(grad_diff * grad_diff) / quad;
                if obj_diff <= obj_diff_min {
                    gmin_idx = Some(j);
                    obj_diff_min = obj_diff;
                }
            }
        }

        if gmax + gmax2 < tol {
            return None;
        }
        gmin_idx.map(|j| (i, j))
    }

    fn update_pair(&mut self, i: usize, j: usize) {
        let c = self.c;
        let q_ij = self.q(i, j);
        let old_ai = self.alpha[i];
        let old_aj = self.alpha[j];
        let (mut ai, mut aj) = (old_ai, old_aj);

        if self.sign[i] != self.sign[j] {
            let quad = positive_or_tau(self.qd(i) + self.qd(j) + 2.0 * q_ij);
            let delta = (-self.grad[i] - self.grad[j]) / quad;
            let diff = ai - aj;
            ai += delta;
            aj += delta;

            if diff > 0.0 {
                if aj < 0.0 {
                    aj = 0.0;
                    ai = diff;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = -diff;
            }
            if diff > 0.0 {
                if ai > c {
                    ai = c;
                    aj = c - diff;
                }
            } else if aj > c {
                aj = c;
                ai = c + diff;
            }
        } else {
            let quad = positive_or_tau(self.qd(i) + self.qd(j) - 2.0 * q_ij);
            let delta = (self.grad[i] - self.grad[j]) / quad;
            let sum = ai + aj;
            ai -= delta;
            aj += delta;

            if sum > c {
                if ai > c {
                    ai = c;
                    aj = sum - c;
                }
            } else if aj < 0.0 {
                aj = 0.0;
                ai = sum;
            }
            if sum > c {
                if aj > c {
                    aj = c;
                    ai = sum - c;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = sum;
            }
        }

        self.alpha[i] = ai;
        self.alpha[j] = aj;

        let d_ai = ai - old_ai;
        let d_aj = aj - old_aj;
        for k in 0..2 * self.l {
            self.grad[k] += self.q(i, k) * d_ai + self.q(j, k) * d_aj;
        }
    }

    fn rho(&self) -> f64 {
        let mut ub = f64::INFINITY;
        let mut lb = f64::NEG_INFINITY;
        let mut sum_free = 0.0;
        let mut n_free = 0usize;

        for t in 0..2 * self.l {
            let y_grad = self.sign[t] * self.grad[t];
            if self.is_upper_bound(t) {
                if self.sign[t] < 0.0 {
                    ub = ub.min(y_grad);
                } else {
                    lb = lb.max(y_grad);
                }
            } else if self.is_lower_bound(t) {
                if self.sign[t] > 0.0 {
                    ub = ub.min(y_grad);
                } else {
                    lb = lb.max(y_grad);
                }
            } else {
                n_free += 1;
                sum_free += y_grad;
            }
        }

        if n_free > 0 {
            sum_free / n_free as f64
        } else {
            (ub + lb) / 2.0
        }
    }
}

fn positive_or_tau(v: f64) -> f64 {
    if v > 0.0 {
        v
    } else {
        TAU
    }
}
