//! Lower-triangular factors `L` with `R = L Lᵀ` for correlated normal draws.

use faer::Mat;

use super::{CorrelationError, CorrelationMatrix};

/// Relative pivot tolerance below which a column is treated as degenerate.
const PIVOT_TOLERANCE: f64 = 1.0e-10;

/// Pivot value below which the matrix is rejected as indefinite.
const NEGATIVE_PIVOT_TOLERANCE: f64 = -1.0e-8;

/// Largest off-diagonal remainder allowed under a vanished pivot; on the
/// order of the square root of the pivot tolerances.
const REMAINDER_TOLERANCE: f64 = 1.0e-4;

/// Lower-triangular square root of a correlation matrix.
#[derive(Debug, Clone)]
pub struct CorrelationFactor {
    lower: Mat<f64>,
}

impl CorrelationFactor {
    /// Semidefinite Cholesky factorization.
    ///
    /// A pivot that vanishes (within tolerance) yields a zero column, so
    /// singular but positive semi-definite matrices such as compound symmetry
    /// with `rho = 1` are supported.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::InvalidCorrelationMatrix` if the matrix is
    /// not positive semi-definite: a pivot is materially negative, or a
    /// vanished pivot leaves a non-zero remainder below it.
    pub fn new(matrix: &CorrelationMatrix) -> Result<Self, CorrelationError> {
        let source = matrix.as_mat();
        let dim = matrix.dim();
        let mut lower = Mat::<f64>::zeros(dim, dim);
        for col in 0..dim {
            let mut pivot = source[(col, col)];
            for k in 0..col {
                pivot -= lower[(col, k)] * lower[(col, k)];
            }
            if pivot < NEGATIVE_PIVOT_TOLERANCE {
                return Err(CorrelationError::InvalidCorrelationMatrix {
                    reason: format!(
                        "matrix is not positive semi-definite (pivot {pivot:.3e} at column {col})"
                    ),
                });
            }
            let degenerate = pivot <= PIVOT_TOLERANCE * source[(col, col)].abs().max(1.0);
            let diag = pivot.max(0.0).sqrt();
            if !degenerate {
                lower[(col, col)] = diag;
            }
            for row in (col + 1)..dim {
                let mut remainder = source[(row, col)];
                for k in 0..col {
                    remainder -= lower[(row, k)] * lower[(col, k)];
                }
                if !degenerate {
                    lower[(row, col)] = remainder / diag;
                } else if remainder.abs() > REMAINDER_TOLERANCE {
                    return Err(CorrelationError::InvalidCorrelationMatrix {
                        reason: format!(
                            "matrix is not positive semi-definite (remainder {remainder:.3e} at ({row}, {col}) under a zero pivot)"
                        ),
                    });
                }
            }
        }
        Ok(Self { lower })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    #[must_use]
    pub const fn lower(&self) -> &Mat<f64> {
        &self.lower
    }

    /// Map independent standard normals `z` to `L z`.
    #[must_use]
    pub fn correlate(&self, independent: &[f64]) -> Vec<f64> {
        debug_assert_eq!(independent.len(), self.dim());
        (0..self.dim())
            .map(|row| {
                (0..=row)
                    .map(|col| self.lower[(row, col)] * independent[col])
                    .sum()
            })
            .collect()
    }
}
