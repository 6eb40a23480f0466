//! # Correlation matrices
//!
//! Builds correlation matrices from a structure keyword, a coefficient and a
//! dimension, and validates explicitly supplied matrices.
//!
//! Structural matrices are:
//!
//! - independence: the identity;
//! - compound symmetry (`cs`): unit diagonal, every off-diagonal entry `rho`;
//! - first-order autoregressive (`ar1`): entry `(i, j)` equal to `rho^|i-j|`.
//!
//! Compound symmetry is positive semi-definite for `rho` in `[-1/(n-1), 1]`
//! and AR(1) for `rho` in `(-1, 1)`. These bounds are advisory: a structural
//! matrix outside them is built (with a warning) and only fails later if it
//! cannot be factorized for sampling. Explicit matrices are always checked
//! for symmetry, unit diagonal, and non-negative eigenvalues.
//!
//! # Examples
//!
//! ```
//! use simcorr::{CorrelationStructure, build_correlation_matrix};
//!
//! let matrix = build_correlation_matrix(3, CorrelationStructure::Ar1, 0.5).unwrap();
//! assert!((matrix.get(0, 2) - 0.25).abs() < 1e-12);
//! ```

use std::fmt;
use std::str::FromStr;

use faer::{Mat, Side};
use rand::rngs::StdRng;
use thiserror::Error;

use crate::copula::sample_standard_normal;
use crate::utils::{matrix_is_finite, max_asymmetry, usize_to_f64};

pub mod factor;
pub mod set;

pub use factor::CorrelationFactor;
pub use set::{CorrelationInput, CorrelationMatrixSet};

/// Absolute tolerance for symmetry, unit diagonal, and eigenvalue checks.
pub const MATRIX_TOLERANCE: f64 = 1.0e-8;

/// Errors returned when building or validating correlation matrices.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CorrelationError {
    #[error("invalid correlation matrix: {reason}")]
    InvalidCorrelationMatrix { reason: String },
    #[error("correlation matrix dimension ({found}) must equal group size ({expected})")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("correlation coefficient must lie in [-1, 1]; found {0}")]
    InvalidCoefficient(f64),
    #[error("correlation matrix dimension must be positive")]
    EmptyDimension,
}

impl CorrelationError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidCorrelationMatrix {
            reason: reason.into(),
        }
    }
}

/// Parametric correlation structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrelationStructure {
    /// Uncorrelated variables.
    #[default]
    Independence,
    /// Exchangeable: every pair shares `rho`.
    CompoundSymmetry,
    /// Correlation decays as `rho^|i-j|`.
    Ar1,
}

impl FromStr for CorrelationStructure {
    type Err = CorrelationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ind" | "independence" => Ok(Self::Independence),
            "cs" | "exchangeable" | "compound_symmetry" => Ok(Self::CompoundSymmetry),
            "ar1" => Ok(Self::Ar1),
            other => Err(CorrelationError::invalid(format!(
                "unknown correlation structure `{other}`"
            ))),
        }
    }
}

impl fmt::Display for CorrelationStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Independence => "ind",
            Self::CompoundSymmetry => "cs",
            Self::Ar1 => "ar1",
        })
    }
}

impl CorrelationStructure {
    /// Whether `rho` is inside the range where the structure is known to be PSD.
    #[must_use]
    pub fn is_advisory_feasible(self, dim: usize, rho: f64) -> bool {
        match self {
            Self::Independence => true,
            Self::CompoundSymmetry => {
                dim <= 1 || (rho >= -1.0 / usize_to_f64(dim - 1) && rho <= 1.0)
            }
            Self::Ar1 => dim <= 1 || (rho > -1.0 && rho < 1.0),
        }
    }
}

/// A square, symmetric, unit-diagonal matrix.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    matrix: Mat<f64>,
}

impl PartialEq for CorrelationMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.dim() == other.dim()
            && (0..self.dim())
                .all(|row| (0..self.dim()).all(|col| self.get(row, col) == other.get(row, col)))
    }
}

impl CorrelationMatrix {
    /// Validate an explicit matrix.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::InvalidCorrelationMatrix` if the matrix is not
    /// square, contains non-finite values, is not symmetric, does not have a
    /// unit diagonal, or has an eigenvalue below `-MATRIX_TOLERANCE`.
    pub fn new(matrix: Mat<f64>) -> Result<Self, CorrelationError> {
        let dim = matrix.nrows();
        if dim == 0 {
            return Err(CorrelationError::EmptyDimension);
        }
        if matrix.ncols() != dim {
            return Err(CorrelationError::invalid(format!(
                "matrix must be square; found {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if !matrix_is_finite(&matrix) {
            return Err(CorrelationError::invalid("matrix contains non-finite values"));
        }
        let asymmetry = max_asymmetry(&matrix);
        if asymmetry > MATRIX_TOLERANCE {
            return Err(CorrelationError::invalid(format!(
                "matrix is not symmetric (max asymmetry {asymmetry:.3e})"
            )));
        }
        if let Some(idx) = (0..dim).find(|&idx| (matrix[(idx, idx)] - 1.0).abs() > MATRIX_TOLERANCE)
        {
            return Err(CorrelationError::invalid(format!(
                "diagonal entry {idx} is {}, expected 1",
                matrix[(idx, idx)]
            )));
        }
        let min_eigenvalue = min_eigenvalue(&matrix)?;
        if min_eigenvalue < -MATRIX_TOLERANCE {
            return Err(CorrelationError::invalid(format!(
                "matrix is not positive semi-definite (min eigenvalue {min_eigenvalue:.3e})"
            )));
        }
        Ok(Self { matrix })
    }

    /// Wrap a matrix produced by a structural formula without the eigenvalue check.
    fn from_structure(matrix: Mat<f64>) -> Self {
        Self { matrix }
    }

    /// Build from the strictly lower triangle, listed row by row
    /// (`r21, r31, r32, r41, ...`).
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError` if the value count is not `dim * (dim - 1) / 2`
    /// or the assembled matrix is invalid.
    pub fn from_lower_triangle(values: &[f64], dim: usize) -> Result<Self, CorrelationError> {
        if dim == 0 {
            return Err(CorrelationError::EmptyDimension);
        }
        let expected = dim * (dim - 1) / 2;
        if values.len() != expected {
            return Err(CorrelationError::invalid(format!(
                "expected {expected} lower-triangle values for dimension {dim}; found {}",
                values.len()
            )));
        }
        let mut matrix = Mat::<f64>::zeros(dim, dim);
        let mut next = values.iter();
        for row in 0..dim {
            matrix[(row, row)] = 1.0;
            for col in 0..row {
                let value = next.next().copied().unwrap_or(f64::NAN);
                matrix[(row, col)] = value;
                matrix[(col, row)] = value;
            }
        }
        Self::new(matrix)
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.matrix[(row, col)]
    }

    #[must_use]
    pub const fn as_mat(&self) -> &Mat<f64> {
        &self.matrix
    }

    #[must_use]
    pub fn into_inner(self) -> Mat<f64> {
        self.matrix
    }

    /// Smallest eigenvalue of the matrix.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::InvalidCorrelationMatrix` if the
    /// eigendecomposition fails.
    pub fn min_eigenvalue(&self) -> Result<f64, CorrelationError> {
        min_eigenvalue(&self.matrix)
    }
}

/// Build a structural correlation matrix of dimension `dim`.
///
/// # Errors
///
/// Returns `CorrelationError::EmptyDimension` for `dim == 0` and
/// `CorrelationError::InvalidCoefficient` if `rho` is outside `[-1, 1]`.
pub fn build_correlation_matrix(
    dim: usize,
    structure: CorrelationStructure,
    rho: f64,
) -> Result<CorrelationMatrix, CorrelationError> {
    if dim == 0 {
        return Err(CorrelationError::EmptyDimension);
    }
    if !rho.is_finite() || !(-1.0..=1.0).contains(&rho) {
        return Err(CorrelationError::InvalidCoefficient(rho));
    }
    if !structure.is_advisory_feasible(dim, rho) {
        log::warn!(
            "{structure} correlation with rho = {rho} and dimension {dim} is outside the positive semi-definite range"
        );
    }

    let matrix = Mat::from_fn(dim, dim, |row, col| {
        if row == col {
            return 1.0;
        }
        match structure {
            CorrelationStructure::Independence => 0.0,
            CorrelationStructure::CompoundSymmetry => rho,
            CorrelationStructure::Ar1 => {
                let lag = i32::try_from(row.abs_diff(col)).unwrap_or(i32::MAX);
                rho.powi(lag)
            }
        }
    });
    Ok(CorrelationMatrix::from_structure(matrix))
}

/// Validate an explicit correlation matrix.
///
/// # Errors
///
/// See [`CorrelationMatrix::new`].
pub fn validate_correlation_matrix(matrix: Mat<f64>) -> Result<CorrelationMatrix, CorrelationError> {
    CorrelationMatrix::new(matrix)
}

/// Draw a random valid correlation matrix: the normalized Gram matrix of
/// `dim` independent standard-normal vectors of length `dim`.
///
/// # Errors
///
/// Returns `CorrelationError::EmptyDimension` for `dim == 0`.
pub fn random_correlation_matrix(
    dim: usize,
    rng: &mut StdRng,
) -> Result<CorrelationMatrix, CorrelationError> {
    if dim == 0 {
        return Err(CorrelationError::EmptyDimension);
    }
    let vectors = Mat::from_fn(dim, dim, |_row, _col| sample_standard_normal(rng));
    let gram = &vectors * vectors.transpose();
    let scale = (0..dim).map(|idx| gram[(idx, idx)].sqrt()).collect::<Vec<_>>();
    let mut matrix = Mat::from_fn(dim, dim, |row, col| {
        if row == col {
            1.0
        } else {
            gram[(row, col)] / (scale[row] * scale[col])
        }
    });
    for row in 0..dim {
        for col in 0..row {
            let symmetric = 0.5 * (matrix[(row, col)] + matrix[(col, row)]);
            matrix[(row, col)] = symmetric;
            matrix[(col, row)] = symmetric;
        }
    }
    CorrelationMatrix::new(matrix)
}

fn min_eigenvalue(matrix: &Mat<f64>) -> Result<f64, CorrelationError> {
    let eigenvalues = matrix
        .as_ref()
        .self_adjoint_eigenvalues(Side::Lower)
        .map_err(|err| CorrelationError::invalid(format!("eigendecomposition failed: {err:?}")))?;
    Ok(eigenvalues.into_iter().fold(f64::INFINITY, f64::min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn assert_valid(matrix: &CorrelationMatrix) {
        let dim = matrix.dim();
        for row in 0..dim {
            assert_relative_eq!(matrix.get(row, row), 1.0);
            for col in 0..dim {
                assert_relative_eq!(matrix.get(row, col), matrix.get(col, row));
            }
        }
        let min = matrix.min_eigenvalue().expect("eigenvalues should compute");
        assert!(min >= -1.0e-8, "min eigenvalue {min}");
    }

    #[test]
    fn independence_is_identity() {
        let matrix = build_correlation_matrix(4, CorrelationStructure::Independence, 0.9)
            .expect("build should succeed");
        assert_relative_eq!(matrix.get(0, 3), 0.0);
        assert_valid(&matrix);
    }

    #[test]
    fn compound_symmetry_fills_off_diagonal() {
        let matrix = build_correlation_matrix(3, CorrelationStructure::CompoundSymmetry, 0.4)
            .expect("build should succeed");
        assert_relative_eq!(matrix.get(1, 0), 0.4);
        assert_relative_eq!(matrix.get(2, 1), 0.4);
        assert_valid(&matrix);
    }

    #[test]
    fn ar1_decays_geometrically() {
        let matrix = build_correlation_matrix(4, CorrelationStructure::Ar1, -0.6)
            .expect("build should succeed");
        assert_relative_eq!(matrix.get(0, 1), -0.6);
        assert_relative_eq!(matrix.get(0, 3), -0.216, epsilon = 1e-12);
        assert_valid(&matrix);
    }

    #[test]
    fn structures_are_psd_across_feasible_range() {
        for dim in 1..=6 {
            for step in 0..=10 {
                let rho = -0.9 + 0.18 * f64::from(step);
                let ar1 = build_correlation_matrix(dim, CorrelationStructure::Ar1, rho)
                    .expect("ar1 should build");
                assert_valid(&ar1);
                let lower = if dim > 1 {
                    -1.0 / usize_to_f64(dim - 1)
                } else {
                    -1.0
                };
                let cs_rho = rho.max(lower);
                let cs = build_correlation_matrix(dim, CorrelationStructure::CompoundSymmetry, cs_rho)
                    .expect("cs should build");
                assert_valid(&cs);
            }
        }
    }

    #[test]
    fn rejects_coefficient_outside_unit_interval() {
        let err = build_correlation_matrix(3, CorrelationStructure::CompoundSymmetry, 1.2)
            .expect_err("rho > 1 should fail");
        assert_eq!(err, CorrelationError::InvalidCoefficient(1.2));
        assert!(build_correlation_matrix(3, CorrelationStructure::Ar1, f64::NAN).is_err());
    }

    #[test]
    fn infeasible_structural_rho_is_still_built() {
        let matrix = build_correlation_matrix(4, CorrelationStructure::CompoundSymmetry, -0.8)
            .expect("advisory bounds are not enforced");
        assert!(!CorrelationStructure::CompoundSymmetry.is_advisory_feasible(4, -0.8));
        assert!(matrix.min_eigenvalue().expect("eigenvalues") < 0.0);
    }

    #[test]
    fn rejects_zero_dimension() {
        assert_eq!(
            build_correlation_matrix(0, CorrelationStructure::Ar1, 0.1),
            Err(CorrelationError::EmptyDimension)
        );
    }

    #[test]
    fn validate_rejects_negative_eigenvalue() {
        let matrix = Mat::from_fn(3, 3, |row, col| {
            if row == col {
                1.0
            } else if (row, col) == (0, 1) || (row, col) == (1, 0) {
                0.9
            } else if (row, col) == (0, 2) || (row, col) == (2, 0) {
                0.9
            } else {
                -0.9
            }
        });
        let err = validate_correlation_matrix(matrix).expect_err("indefinite matrix should fail");
        assert!(matches!(err, CorrelationError::InvalidCorrelationMatrix { .. }));
    }

    #[test]
    fn validate_rejects_asymmetric_and_non_unit_diagonal() {
        let asymmetric = Mat::from_fn(2, 2, |row, col| match (row, col) {
            (0, 1) => 0.3,
            (1, 0) => 0.2,
            _ => 1.0,
        });
        assert!(validate_correlation_matrix(asymmetric).is_err());

        let diagonal = Mat::from_fn(2, 2, |row, col| if row == col { 2.0 } else { 0.1 });
        assert!(validate_correlation_matrix(diagonal).is_err());

        let rectangular = Mat::from_fn(2, 3, |_row, _col| 0.0);
        assert!(validate_correlation_matrix(rectangular).is_err());
    }

    #[test]
    fn validate_accepts_singular_psd_matrix() {
        let ones = Mat::from_fn(3, 3, |_row, _col| 1.0);
        let matrix = validate_correlation_matrix(ones).expect("rank-one matrix is PSD");
        assert_eq!(matrix.dim(), 3);
    }

    #[test]
    fn lower_triangle_fills_symmetric_matrix() {
        let matrix = CorrelationMatrix::from_lower_triangle(&[0.2, 0.3, 0.4], 3)
            .expect("valid triangle");
        assert_relative_eq!(matrix.get(0, 1), 0.2);
        assert_relative_eq!(matrix.get(2, 0), 0.3);
        assert_relative_eq!(matrix.get(1, 2), 0.4);
        assert!(CorrelationMatrix::from_lower_triangle(&[0.2], 3).is_err());
    }

    #[test]
    fn random_matrix_is_valid() {
        let mut rng = StdRng::seed_from_u64(7);
        let matrix = random_correlation_matrix(5, &mut rng).expect("random matrix");
        assert_valid(&matrix);
    }

    #[test]
    fn structure_keywords_parse() {
        assert_eq!(
            "cs".parse::<CorrelationStructure>(),
            Ok(CorrelationStructure::CompoundSymmetry)
        );
        assert_eq!("AR1".parse::<CorrelationStructure>(), Ok(CorrelationStructure::Ar1));
        assert!("toeplitz".parse::<CorrelationStructure>().is_err());
    }
}
