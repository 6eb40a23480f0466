//! # Utilities
//!
//! Shared numeric conversions and small faer matrix helpers used by the
//! correlation, sampling, and reporting modules.

use faer::Mat;
use num_traits::ToPrimitive;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    value.to_f64().unwrap_or(f64::MAX)
}

#[must_use]
pub fn identity_matrix(dim: usize) -> Mat<f64> {
    Mat::from_fn(dim, dim, |row, col| if row == col { 1.0 } else { 0.0 })
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

/// Largest `|a_ij - a_ji|` over the matrix.
#[must_use]
pub fn max_asymmetry(matrix: &Mat<f64>) -> f64 {
    let mut max = 0.0_f64;
    for row in 0..matrix.nrows() {
        for col in 0..row {
            max = max.max((matrix[(row, col)] - matrix[(col, row)]).abs());
        }
    }
    max
}

/// Largest absolute elementwise difference; callers check that the shapes match.
#[must_use]
pub(crate) fn max_abs_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let mut max = 0.0_f64;
    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            max = max.max((a[(i, j)] - b[(i, j)]).abs());
        }
    }
    max
}

#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / usize_to_f64(values.len())
}

/// Unbiased sample variance; `NaN` for fewer than two values.
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let center = mean(values);
    let sum_sq = values
        .iter()
        .map(|value| (value - center) * (value - center))
        .sum::<f64>();
    sum_sq / (usize_to_f64(values.len()) - 1.0)
}

/// Pearson correlation between two equally long slices.
#[must_use]
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let mean_a = mean(a);
    let mean_b = mean(b);
    let mut cross = 0.0;
    let mut ss_a = 0.0;
    let mut ss_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cross += da * db;
        ss_a += da * da;
        ss_b += db * db;
    }
    cross / (ss_a * ss_b).sqrt()
}
