//! # Correlation diagnostics
//!
//! Empirical Pearson correlation of generated columns, and a rendered table
//! comparing it with the target matrix pair by pair.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED,
};
use faer::Mat;
use thiserror::Error;

use crate::input::{InputError, UnitTable};
use crate::utils::{max_abs_diff, pearson};

/// Errors returned by the diagnostics helpers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("at least two columns are required; found {0}")]
    TooFewColumns(usize),
    #[error("matrices must be {expected}x{expected} to match the names; found {found}x{found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Pearson correlation matrix of the named columns.
///
/// # Errors
///
/// Returns `ReportError::TooFewColumns` for fewer than two names and
/// `InputError::MissingColumn` for unknown names.
pub fn empirical_correlation(table: &UnitTable, columns: &[&str]) -> Result<Mat<f64>, ReportError> {
    if columns.len() < 2 {
        return Err(ReportError::TooFewColumns(columns.len()));
    }
    let values = columns
        .iter()
        .map(|name| table.require_column(name))
        .collect::<Result<Vec<_>, _>>()?;
    let dim = values.len();
    let mut matrix = Mat::<f64>::zeros(dim, dim);
    for i in 0..dim {
        matrix[(i, i)] = 1.0;
        for j in 0..i {
            let r = pearson(values[i], values[j]);
            matrix[(i, j)] = r;
            matrix[(j, i)] = r;
        }
    }
    Ok(matrix)
}

/// Largest absolute gap between two equally sized square matrices.
///
/// # Errors
///
/// Returns `ReportError::DimensionMismatch` if `realized` is not square with
/// the same dimension as `target`, or if `target` is not square.
pub fn max_correlation_deviation(target: &Mat<f64>, realized: &Mat<f64>) -> Result<f64, ReportError> {
    let dim = target.nrows();
    check_dimension(target, dim)?;
    check_dimension(realized, dim)?;
    Ok(max_abs_diff(target, realized))
}

fn check_dimension(matrix: &Mat<f64>, dim: usize) -> Result<(), ReportError> {
    if matrix.nrows() != dim || matrix.ncols() != dim {
        let found = if matrix.nrows() == dim { matrix.ncols() } else { matrix.nrows() };
        return Err(ReportError::DimensionMismatch { expected: dim, found });
    }
    Ok(())
}

/// Render target vs. realized correlations, one row per pair.
///
/// The pair with the largest absolute deviation is highlighted.
///
/// # Errors
///
/// Returns `ReportError::DimensionMismatch` if either matrix does not have
/// one row per name.
pub fn render_correlation_comparison(
    target: &Mat<f64>,
    realized: &Mat<f64>,
    names: &[&str],
) -> Result<String, ReportError> {
    let dim = names.len();
    check_dimension(target, dim)?;
    check_dimension(realized, dim)?;
    let worst = max_correlation_deviation(target, realized)?;

    let mut table = make_table(&["pair", "target", "realized", "deviation"]);
    for i in 0..dim {
        for j in (i + 1)..dim {
            let deviation = realized[(i, j)] - target[(i, j)];
            table.add_row(vec![
                Cell::new(format!("{} ~ {}", names[i], names[j])),
                Cell::new(format!("{:.4}", target[(i, j)])),
                Cell::new(format!("{:.4}", realized[(i, j)])),
                highlight_deviation_cell(deviation, worst, 4),
            ]);
        }
    }
    Ok(table.to_string())
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}

fn highlight_deviation_cell(value: f64, worst: f64, precision: usize) -> Cell {
    let is_worst = worst > 0.0 && (value.abs() - worst).abs() < 1e-12;
    if is_worst {
        Cell::new(format!("{value:+.precision$}"))
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    } else {
        Cell::new(format!("{value:+.precision$}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table() -> UnitTable {
        UnitTable::with_sequential_ids("id", 4)
            .with_column("a", vec![1.0, 2.0, 3.0, 4.0])
            .with_column("b", vec![2.0, 4.0, 6.0, 8.0])
            .with_column("c", vec![4.0, 3.0, 2.0, 1.0])
    }

    #[test]
    fn empirical_correlation_is_symmetric_with_unit_diagonal() {
        let matrix = empirical_correlation(&table(), &["a", "b", "c"]).expect("correlation");
        assert_relative_eq!(matrix[(0, 0)], 1.0);
        assert_relative_eq!(matrix[(1, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(matrix[(0, 2)], -1.0, epsilon = 1e-12);
        assert_relative_eq!(matrix[(2, 1)], matrix[(1, 2)]);
    }

    #[test]
    fn empirical_correlation_rejects_unknown_columns() {
        let err = empirical_correlation(&table(), &["a", "z"]).expect_err("unknown column");
        assert_eq!(err, ReportError::Input(InputError::MissingColumn("z".to_string())));
        assert_eq!(
            empirical_correlation(&table(), &["a"]),
            Err(ReportError::TooFewColumns(1))
        );
    }

    #[test]
    fn comparison_lists_every_pair() {
        let target = Mat::from_fn(3, 3, |i, j| if i == j { 1.0 } else { 0.5 });
        let mut realized = target.clone();
        realized[(0, 2)] = 0.4;
        realized[(2, 0)] = 0.4;
        let rendered =
            render_correlation_comparison(&target, &realized, &["x", "y", "z"]).expect("render");
        assert!(rendered.contains("x ~ y"));
        assert!(rendered.contains("y ~ z"));
        assert!(rendered.contains("-0.1000"));
        let worst = max_correlation_deviation(&target, &realized).expect("same shape");
        assert_relative_eq!(worst, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn comparison_rejects_wrong_dimension() {
        let target = crate::utils::identity_matrix(2);
        let err = render_correlation_comparison(&target, &target, &["x", "y", "z"])
            .expect_err("dimension mismatch");
        assert_eq!(
            err,
            ReportError::DimensionMismatch {
                expected: 3,
                found: 2,
            }
        );
    }

    #[test]
    fn deviation_rejects_mismatched_shapes() {
        let target = crate::utils::identity_matrix(3);
        let realized = crate::utils::identity_matrix(2);
        let err = max_correlation_deviation(&target, &realized).expect_err("3x3 vs 2x2");
        assert_eq!(
            err,
            ReportError::DimensionMismatch {
                expected: 3,
                found: 2,
            }
        );

        let rectangular = Mat::<f64>::zeros(3, 2);
        assert_eq!(
            max_correlation_deviation(&rectangular, &rectangular),
            Err(ReportError::DimensionMismatch {
                expected: 3,
                found: 2,
            })
        );
    }
}
