//! Parameter evaluation seam.
//!
//! Formula parameters are evaluated outside this crate. A
//! [`ParameterEvaluator`] receives the formula text and a read-only view of
//! one row and returns the linear predictor; the link's inverse turns it into
//! the mean, rate, or probability. Closures with the matching signature
//! implement the trait.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::input::RowContext;

/// Errors returned by parameter evaluators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("formula `{0}` requires a parameter evaluator")]
    Unavailable(String),
    #[error("formula evaluation failed: {0}")]
    Failed(String),
    #[error("unknown link function `{0}`")]
    UnknownLink(String),
}

/// Link between a linear predictor and its parameter scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Link {
    #[default]
    Identity,
    Log,
    Logit,
}

impl Link {
    /// Map a linear predictor back to the parameter scale.
    #[must_use]
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Self::Identity => eta,
            Self::Log => eta.exp(),
            Self::Logit => {
                if eta >= 0.0 {
                    1.0 / (1.0 + (-eta).exp())
                } else {
                    let exp_eta = eta.exp();
                    exp_eta / (1.0 + exp_eta)
                }
            }
        }
    }

    /// Map a parameter to the linear-predictor scale.
    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Log => value.ln(),
            Self::Logit => (value / (1.0 - value)).ln(),
        }
    }
}

impl FromStr for Link {
    type Err = EvaluationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "log" => Ok(Self::Log),
            "logit" => Ok(Self::Logit),
            other => Err(EvaluationError::UnknownLink(other.to_string())),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::Log => "log",
            Self::Logit => "logit",
        })
    }
}

/// External formula evaluator.
pub trait ParameterEvaluator {
    /// Linear predictor of `formula` for one row.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationError` if the formula cannot be evaluated.
    fn linear_predictor(&self, formula: &str, row: &RowContext<'_>) -> Result<f64, EvaluationError>;

    /// Parameter value of `formula` for one row on the scale given by `link`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ParameterEvaluator::linear_predictor`].
    fn evaluate(&self, formula: &str, row: &RowContext<'_>, link: Link) -> Result<f64, EvaluationError> {
        self.linear_predictor(formula, row).map(|eta| link.inverse(eta))
    }
}

impl<F> ParameterEvaluator for F
where
    F: Fn(&str, &RowContext<'_>) -> Result<f64, EvaluationError>,
{
    fn linear_predictor(&self, formula: &str, row: &RowContext<'_>) -> Result<f64, EvaluationError> {
        self(formula, row)
    }
}

/// Evaluator used when the caller supplies none; every formula fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvaluator;

impl ParameterEvaluator for NoEvaluator {
    fn linear_predictor(&self, formula: &str, _row: &RowContext<'_>) -> Result<f64, EvaluationError> {
        Err(EvaluationError::Unavailable(formula.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::UnitTable;
    use approx::assert_relative_eq;

    #[test]
    fn links_round_trip() {
        for link in [Link::Identity, Link::Log, Link::Logit] {
            assert_relative_eq!(link.inverse(link.apply(0.3)), 0.3, epsilon = 1e-12);
        }
        assert_relative_eq!(Link::Logit.inverse(-800.0), 0.0);
        assert_relative_eq!(Link::Logit.inverse(800.0), 1.0);
    }

    fn shifted_x(_formula: &str, row: &RowContext<'_>) -> Result<f64, EvaluationError> {
        row.get("x")
            .map(|x| 0.5 + x)
            .ok_or_else(|| EvaluationError::Failed("x missing".to_string()))
    }

    #[test]
    fn function_evaluator_applies_inverse_link() {
        let table = UnitTable::with_sequential_ids("id", 2).with_column("x", vec![0.0, 1.0]);
        let value = shifted_x
            .evaluate("0.5 + x", &table.row(1), Link::Log)
            .expect("evaluate");
        assert_relative_eq!(value, 1.5_f64.exp());
    }

    #[test]
    fn missing_evaluator_reports_formula() {
        let table = UnitTable::with_sequential_ids("id", 1);
        assert_eq!(
            NoEvaluator.evaluate("a + b", &table.row(0), Link::Identity),
            Err(EvaluationError::Unavailable("a + b".to_string()))
        );
    }

    #[test]
    fn link_names_parse() {
        assert_eq!("logit".parse::<Link>(), Ok(Link::Logit));
        assert!("probit".parse::<Link>().is_err());
    }
}
