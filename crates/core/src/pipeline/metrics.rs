//! Error metrics over price-unit test predictions.

/// Mean absolute percentage error, as a percentage.
///
/// Fails when an actual value is zero, where the ratio is undefined.
pub fn mean_absolute_percentage_error(actual: &[f64], predicted: &[f64]) -> anyhow::Result<f64> {
    anyhow::ensure!(
        actual.len() == predicted.len(),
        "length mismatch: {} actual vs {} predicted",
        actual.len(),
        predicted.len()
    );
    anyhow::ensure!(!actual.is_empty(), "no values to evaluate");

    let mut sum = 0.0;
    for (a, p) in actual.iter().zip(predicted) {
        anyhow::ensure!(*a != 0.0, "actual close of 0 makes MAPE undefined");
        sum += ((a - p) / a).abs();
    }
    Ok(sum / actual.len() as f64 * 100.0)
}

pub fn root_mean_squared_error(actual: &[f64], predicted: &[f64]) -> anyhow::Result<f64> {
    anyhow::ensure!(
        actual.len() == predicted.len(),
        "length mismatch: {} actual vs {} predicted",
        actual.len(),
        predicted.len()
    );
    anyhow::ensure!(!actual.is_empty(), "no values to evaluate");

    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64;
    Ok(mse.sqrt())
}
