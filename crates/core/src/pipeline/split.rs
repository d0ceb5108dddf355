use chrono::NaiveDate;
use ndarray::{s, Array1, Array2, ArrayView2};

/// Supervised next-day dataset cut positionally into train and test.
///
/// Row `t` pairs the same-day scaled features with the scaled close of day `t + 1`;
/// `*_dates` hold the date of that next day.
#[derive(Debug, Clone)]
pub struct Split {
    pub train_features: Array2<f64>,
    pub train_target: Array1<f64>,
    pub train_dates: Vec<NaiveDate>,
    pub test_features: Array2<f64>,
    pub test_target: Array1<f64>,
    pub test_dates: Vec<NaiveDate>,
}

/// Position of the first test row among `len` supervised rows.
pub fn split_index(len: usize, test_split: f64) -> usize {
    ((len as f64) * (1.0 - test_split)).floor() as usize
}

/// `table` is scaled with the target in column 0 and features in the rest.
pub fn next_day_split(table: ArrayView2<'_, f64>, dates: &[NaiveDate], test_split: f64) -> Split {
    debug_assert_eq!(table.nrows(), dates.len());

    let rows = table.nrows().saturating_sub(1);
    let features = table.slice(s![..rows, 1..]);
    let target = table.slice(s![1.., 0]);
    let target_dates = dates.get(1..).unwrap_or_default();

    let cut = split_index(rows, test_split).min(rows);

    Split {
        train_features: features.slice(s![..cut, ..]).to_owned(),
        train_target: target.slice(s![..cut]).to_owned(),
        train_dates: target_dates[..cut].to_vec(),
        test_features: features.slice(s![cut.., ..]).to_owned(),
        test_target: target.slice(s![cut..]).to_owned(),
        test_dates: target_dates[cut..].to_vec(),
    }
}
