pub mod linear;
pub mod svr;

use crate::pipeline::error::PipelineError;
use linear::LinearRegression;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use svr::{Kernel, Svr, SvrParams};

/// Fixed hyperparameters shared by every SVR variant.
pub const SVR_C: f64 = 3.0;
pub const SVR_EPSILON: f64 = 0.001;

/// The five regressors every run fits, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    SvrRbf,
    SvrLinear,
    SvrPoly,
    SvrSigmoid,
    LinearRegression,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::SvrRbf,
        ModelKind::SvrLinear,
        ModelKind::SvrPoly,
        ModelKind::SvrSigmoid,
        ModelKind::LinearRegression,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ModelKind::SvrRbf => "SVR - Kernel RBF",
            ModelKind::SvrLinear => "SVR - Kernel Linear",
            ModelKind::SvrPoly => "SVR - Kernel Polynomial",
            ModelKind::SvrSigmoid => "SVR - Kernel Sigmoid",
            ModelKind::LinearRegression => "Linear Regression",
        }
    }

    fn kernel(self) -> Option<Kernel> {
        match self {
            ModelKind::SvrRbf => Some(Kernel::Rbf),
            ModelKind::SvrLinear => Some(Kernel::Linear),
            ModelKind::SvrPoly => Some(Kernel::Poly),
            ModelKind::SvrSigmoid => Some(Kernel::Sigmoid),
            ModelKind::LinearRegression => None,
        }
    }

    /// Fits this variant. Any numeric failure is reported as
    /// `PipelineError::Prediction` naming the model; a fit abandoned because
    /// `cancel` was set is `PipelineError::Cancelled`.
    pub fn fit(
        self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        cancel: &AtomicBool,
    ) -> Result<FittedModel, PipelineError> {
        let fitted = match self.kernel() {
            Some(kernel) => {
                let params = SvrParams::new(kernel).with_c(SVR_C).with_epsilon(SVR_EPSILON);
                Svr::fit_cancellable(params, x, y, cancel).map(FittedModel::Svr)
            }
            None => LinearRegression::fit(x, y).map(FittedModel::Linear),
        };
        fitted.map_err(|e| {
            if cancel.load(Ordering::Relaxed) {
                PipelineError::Cancelled
            } else {
                PipelineError::prediction(self, e)
            }
        })
    }
}

#[derive(Debug, Clone)]
pub enum FittedModel {
    Svr(Svr),
    Linear(LinearRegression),
}

impl FittedModel {
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> anyhow::Result<Array1<f64>> {
        match self {
            FittedModel::Svr(m) => m.predict(x),
            FittedModel::Linear(m) => m.predict(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn labels_are_distinct() {
        let mut labels: Vec<_> = ModelKind::ALL.iter().map(|k| k.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), ModelKind::ALL.len());
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&ModelKind::SvrSigmoid).unwrap();
        assert_eq!(s, "\"svr_sigmoid\"");
    }

    #[test]
    fn fit_failure_names_the_model() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0];
        let err = ModelKind::SvrPoly
            .fit(x.view(), y.view(), &AtomicBool::new(false))
            .unwrap_err();
        match err {
            PipelineError::Prediction { model, .. } => assert_eq!(model, ModelKind::SvrPoly),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cancelled_svr_fit_is_reported_as_cancelled() {
        let x = array![[0.0, 1.0], [0.5, 0.2], [1.0, 0.7], [0.3, 0.9]];
        let y = array![0.1, 0.6, 0.9, 0.3];
        let err = ModelKind::SvrRbf
            .fit(x.view(), y.view(), &AtomicBool::new(true))
            .unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
    }
}
