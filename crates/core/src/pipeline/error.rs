use crate::model::ModelKind;
use chrono::NaiveDate;
use std::fmt;

/// Failures the prediction pipeline reports to its caller. Travels inside
/// `anyhow::Error`; callers recover it with `downcast_ref::<PipelineError>()`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    InsufficientData { required: usize, actual: usize },
    /// More rows than the dense kernel matrix is allowed to hold.
    TooManyRows { limit: usize, actual: usize },
    MissingField { field: &'static str },
    DuplicateDate { date: NaiveDate },
    InvalidTestSplit { value: f64 },
    /// Column has min == max, so min-max scaling is undefined.
    Scaling { column: &'static str },
    Prediction { model: ModelKind, detail: String },
    /// The caller gave up on the run; nothing was produced.
    Cancelled,
}

impl PipelineError {
    pub fn prediction(model: ModelKind, err: impl fmt::Display) -> Self {
        Self::Prediction {
            model,
            detail: format!("{err:#}"),
        }
    }

    /// True for problems with the caller's data rather than with the numerics.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::Prediction { .. } | Self::Cancelled)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData { required, actual } => write!(
                f,
                "insufficient data: need at least {required} usable rows, got {actual}"
            ),
            Self::TooManyRows { limit, actual } => write!(
                f,
                "too many rows: at most {limit} usable rows are accepted, got {actual}"
            ),
            Self::MissingField { field } => write!(f, "required field missing: {field}"),
            Self::DuplicateDate { date } => write!(f, "duplicate price row for date {date}"),
            Self::InvalidTestSplit { value } => {
                write!(f, "test split must be between 0 and 1 (exclusive), got {value}")
            }
            Self::Scaling { column } => write!(
                f,
                "cannot min-max scale column {column}: all values are equal"
            ),
            Self::Prediction { model, detail } => {
                write!(f, "prediction failed (model={}): {detail}", model.label())
            }
            Self::Cancelled => write!(f, "prediction cancelled"),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_failures_are_not_input_errors() {
        assert!(PipelineError::TooManyRows { limit: 10, actual: 11 }.is_input_error());
        assert!(PipelineError::InvalidTestSplit { value: 1e-17 }.is_input_error());
        assert!(!PipelineError::Cancelled.is_input_error());
        assert!(!PipelineError::prediction(ModelKind::SvrRbf, "boom").is_input_error());
    }
}
