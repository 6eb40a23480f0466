//! # Marginal mapping
//!
//! Turns a copula uniform into a draw from the target marginal by applying
//! that marginal's quantile function with per-row parameters.
//!
//! | distribution | first parameter | second parameter |
//! |---|---|---|
//! | normal | mean | variance |
//! | poisson | mean | |
//! | binary | probability | |
//! | gamma | mean | dispersion `d` (variance `d·mean²`) |
//! | negative binomial | mean | dispersion `d` (variance `mean + d·mean²`) |
//! | uniform | minimum | maximum |
//!
//! Each distribution is described by a [`MarginalRule`] in a static lookup
//! table holding its parameter count and quantile function.

use std::fmt;
use std::str::FromStr;

use num_traits::ToPrimitive;
use statrs::distribution::{
    Bernoulli, ContinuousCDF, DiscreteCDF, Gamma, NegativeBinomial, Normal, Poisson, Uniform,
};
use thiserror::Error;

use crate::evaluate::Link;

/// Errors returned by marginal specifications and transforms.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarginalError {
    #[error("{distribution} requires {expected} parameter(s); found {found}")]
    ParameterCountMismatch {
        distribution: Distribution,
        expected: usize,
        found: usize,
    },
    #[error("unsupported distribution `{0}`")]
    UnsupportedDistribution(String),
    #[error("invalid {distribution} parameters: {reason}")]
    InvalidParameter {
        distribution: Distribution,
        reason: String,
    },
}

fn invalid(distribution: Distribution, reason: impl Into<String>) -> MarginalError {
    MarginalError::InvalidParameter {
        distribution,
        reason: reason.into(),
    }
}

/// Supported marginal distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distribution {
    Normal,
    Gamma,
    Binary,
    Poisson,
    NegativeBinomial,
    Uniform,
}

impl FromStr for Distribution {
    type Err = MarginalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "gamma" => Ok(Self::Gamma),
            "binary" => Ok(Self::Binary),
            "poisson" => Ok(Self::Poisson),
            "negbinomial" | "nb" | "negative_binomial" => Ok(Self::NegativeBinomial),
            "uniform" => Ok(Self::Uniform),
            _ => Err(MarginalError::UnsupportedDistribution(value.to_string())),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Gamma => "gamma",
            Self::Binary => "binary",
            Self::Poisson => "poisson",
            Self::NegativeBinomial => "negBinomial",
            Self::Uniform => "uniform",
        })
    }
}

impl Distribution {
    #[must_use]
    pub fn rule(self) -> &'static MarginalRule {
        match self {
            Self::Normal => &RULES[0],
            Self::Gamma => &RULES[1],
            Self::Binary => &RULES[2],
            Self::Poisson => &RULES[3],
            Self::NegativeBinomial => &RULES[4],
            Self::Uniform => &RULES[5],
        }
    }

    #[must_use]
    pub fn parameter_count(self) -> usize {
        self.rule().parameter_count
    }
}

/// Parameter count and quantile function of one distribution.
#[derive(Debug)]
pub struct MarginalRule {
    pub distribution: Distribution,
    pub parameter_count: usize,
    quantile: fn(f64, &[f64]) -> Result<f64, MarginalError>,
}

static RULES: [MarginalRule; 6] = [
    MarginalRule {
        distribution: Distribution::Normal,
        parameter_count: 2,
        quantile: normal_quantile,
    },
    MarginalRule {
        distribution: Distribution::Gamma,
        parameter_count: 2,
        quantile: gamma_quantile,
    },
    MarginalRule {
        distribution: Distribution::Binary,
        parameter_count: 1,
        quantile: binary_quantile,
    },
    MarginalRule {
        distribution: Distribution::Poisson,
        parameter_count: 1,
        quantile: poisson_quantile,
    },
    MarginalRule {
        distribution: Distribution::NegativeBinomial,
        parameter_count: 2,
        quantile: negative_binomial_quantile,
    },
    MarginalRule {
        distribution: Distribution::Uniform,
        parameter_count: 2,
        quantile: uniform_quantile,
    },
];

impl MarginalRule {
    /// # Errors
    ///
    /// Returns `MarginalError::ParameterCountMismatch` if `found` differs from
    /// the rule's parameter count.
    pub const fn check_count(&self, found: usize) -> Result<(), MarginalError> {
        if found != self.parameter_count {
            return Err(MarginalError::ParameterCountMismatch {
                distribution: self.distribution,
                expected: self.parameter_count,
                found,
            });
        }
        Ok(())
    }
}

/// Where a parameter value comes from for each row.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    /// Same value for every row.
    Constant(f64),
    /// Numeric column of the input table.
    Column(String),
    /// One value per generated variable, indexed by within-group sequence.
    PerVariable(Vec<f64>),
    /// Formula evaluated per row by an external evaluator, then inverse-linked.
    Formula { formula: String, link: Link },
}

impl From<f64> for ParamSource {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl From<&str> for ParamSource {
    fn from(value: &str) -> Self {
        Self::Column(value.to_string())
    }
}

impl From<Vec<f64>> for ParamSource {
    fn from(values: Vec<f64>) -> Self {
        Self::PerVariable(values)
    }
}

/// One new variable: its distribution and parameter sources.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalSpec {
    pub distribution: Distribution,
    pub params: Vec<ParamSource>,
}

impl MarginalSpec {
    #[must_use]
    pub const fn new(distribution: Distribution, params: Vec<ParamSource>) -> Self {
        Self {
            distribution,
            params,
        }
    }

    /// Build from a distribution keyword.
    ///
    /// # Errors
    ///
    /// Returns `MarginalError::UnsupportedDistribution` for unknown keywords.
    pub fn parse(distribution: &str, params: Vec<ParamSource>) -> Result<Self, MarginalError> {
        Ok(Self::new(distribution.parse()?, params))
    }

    /// # Errors
    ///
    /// Returns `MarginalError::ParameterCountMismatch` if the number of
    /// parameter sources does not fit the distribution.
    pub fn validate(&self) -> Result<(), MarginalError> {
        self.distribution.rule().check_count(self.params.len())
    }
}

/// Map a uniform `u` to the target marginal.
///
/// `u <= 0` and `u >= 1` map to the lower and upper support bounds.
///
/// # Errors
///
/// Returns `MarginalError::ParameterCountMismatch` for the wrong number of
/// parameters and `MarginalError::InvalidParameter` for parameters outside
/// the distribution's domain.
pub fn transform(u: f64, distribution: Distribution, params: &[f64]) -> Result<f64, MarginalError> {
    let rule = distribution.rule();
    check_parameters(distribution, params)?;
    if u.is_nan() {
        return Err(invalid(distribution, "uniform draw is NaN"));
    }
    (rule.quantile)(u, params)
}

/// Check one row's parameters against the distribution's count and domain.
///
/// # Errors
///
/// Returns `MarginalError::ParameterCountMismatch` for the wrong number of
/// parameters and `MarginalError::InvalidParameter` for non-finite values or
/// values outside the domain (negative variance or Poisson mean, probability
/// outside `[0, 1]`, non-positive gamma or negative binomial mean or
/// dispersion, minimum above maximum).
pub fn check_parameters(distribution: Distribution, params: &[f64]) -> Result<(), MarginalError> {
    distribution.rule().check_count(params.len())?;
    if let Some(value) = params.iter().find(|value| !value.is_finite()) {
        return Err(invalid(distribution, format!("non-finite parameter {value}")));
    }
    match distribution {
        Distribution::Normal if params[1] < 0.0 => Err(invalid(
            distribution,
            format!("variance must be non-negative; found {}", params[1]),
        )),
        Distribution::Poisson if params[0] < 0.0 => Err(invalid(
            distribution,
            format!("mean must be non-negative; found {}", params[0]),
        )),
        Distribution::Binary if !(0.0..=1.0).contains(&params[0]) => Err(invalid(
            distribution,
            format!("probability must lie in [0, 1]; found {}", params[0]),
        )),
        Distribution::Gamma => gamma_shape_rate(params[0], params[1]).map(|_| ()),
        Distribution::NegativeBinomial => {
            negative_binomial_size_prob(params[0], params[1]).map(|_| ())
        }
        Distribution::Uniform if params[0] > params[1] => Err(invalid(
            distribution,
            format!("minimum ({}) must not exceed maximum ({})", params[0], params[1]),
        )),
        _ => Ok(()),
    }
}

/// Gamma `(shape, rate)` from mean and dispersion.
///
/// # Errors
///
/// Returns `MarginalError::InvalidParameter` unless `mean > 0` and
/// `dispersion > 0`.
pub fn gamma_shape_rate(mean: f64, dispersion: f64) -> Result<(f64, f64), MarginalError> {
    if !(mean > 0.0 && mean.is_finite()) {
        return Err(invalid(Distribution::Gamma, format!("mean must be positive; found {mean}")));
    }
    if !(dispersion > 0.0 && dispersion.is_finite()) {
        return Err(invalid(
            Distribution::Gamma,
            format!("dispersion must be positive; found {dispersion}"),
        ));
    }
    let shape = dispersion.recip();
    let rate = (dispersion * mean).recip();
    Ok((shape, rate))
}

/// Negative binomial `(size, probability)` from mean and dispersion.
///
/// # Errors
///
/// Returns `MarginalError::InvalidParameter` unless `mean > 0` and
/// `dispersion > 0`.
pub fn negative_binomial_size_prob(mean: f64, dispersion: f64) -> Result<(f64, f64), MarginalError> {
    if !(mean > 0.0 && mean.is_finite()) {
        return Err(invalid(
            Distribution::NegativeBinomial,
            format!("mean must be positive; found {mean}"),
        ));
    }
    if !(dispersion > 0.0 && dispersion.is_finite()) {
        return Err(invalid(
            Distribution::NegativeBinomial,
            format!("dispersion must be positive; found {dispersion}"),
        ));
    }
    let size = dispersion.recip();
    let probability = dispersion.mul_add(mean, 1.0).recip();
    Ok((size, probability))
}

enum Boundary {
    Lower,
    Upper,
    Interior,
}

fn boundary(u: f64) -> Boundary {
    if u <= 0.0 {
        Boundary::Lower
    } else if u >= 1.0 {
        Boundary::Upper
    } else {
        Boundary::Interior
    }
}

fn count_to_f64(value: u64) -> f64 {
    value.to_f64().unwrap_or(f64::INFINITY)
}

/// Smallest count `k` with `cdf(k) >= u`, for `u` strictly inside `(0, 1)`.
///
/// Brackets the answer by doubling, then bisects on integers; mass at zero
/// returns without a search.
fn discrete_quantile<D>(distribution: &D, u: f64) -> f64
where
    D: DiscreteCDF<u64, f64>,
{
    if u <= distribution.cdf(0) {
        return 0.0;
    }
    let mut low = 0_u64;
    let mut high = 1_u64;
    while distribution.cdf(high) < u {
        if high > u64::MAX / 2 {
            return f64::INFINITY;
        }
        low = high;
        high *= 2;
    }
    // cdf(low) < u <= cdf(high)
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if distribution.cdf(mid) >= u {
            high = mid;
        } else {
            low = mid;
        }
    }
    count_to_f64(high)
}

fn normal_quantile(u: f64, params: &[f64]) -> Result<f64, MarginalError> {
    let (mean, variance) = (params[0], params[1]);
    if variance < 0.0 {
        return Err(invalid(
            Distribution::Normal,
            format!("variance must be non-negative; found {variance}"),
        ));
    }
    if variance == 0.0 {
        return Ok(mean);
    }
    match boundary(u) {
        Boundary::Lower => Ok(f64::NEG_INFINITY),
        Boundary::Upper => Ok(f64::INFINITY),
        Boundary::Interior => {
            let normal = Normal::new(mean, variance.sqrt())
                .map_err(|err| invalid(Distribution::Normal, err.to_string()))?;
            Ok(normal.inverse_cdf(u))
        }
    }
}

fn gamma_quantile(u: f64, params: &[f64]) -> Result<f64, MarginalError> {
    let (shape, rate) = gamma_shape_rate(params[0], params[1])?;
    match boundary(u) {
        Boundary::Lower => Ok(0.0),
        Boundary::Upper => Ok(f64::INFINITY),
        Boundary::Interior => {
            let gamma = Gamma::new(shape, rate)
                .map_err(|err| invalid(Distribution::Gamma, err.to_string()))?;
            Ok(gamma.inverse_cdf(u))
        }
    }
}

fn binary_quantile(u: f64, params: &[f64]) -> Result<f64, MarginalError> {
    let p = params[0];
    if !(0.0..=1.0).contains(&p) {
        return Err(invalid(
            Distribution::Binary,
            format!("probability must lie in [0, 1]; found {p}"),
        ));
    }
    match boundary(u) {
        Boundary::Lower => Ok(0.0),
        Boundary::Upper => Ok(1.0),
        Boundary::Interior => {
            let bernoulli =
                Bernoulli::new(p).map_err(|err| invalid(Distribution::Binary, err.to_string()))?;
            Ok(discrete_quantile(&bernoulli, u))
        }
    }
}

fn poisson_quantile(u: f64, params: &[f64]) -> Result<f64, MarginalError> {
    let mean = params[0];
    if mean < 0.0 {
        return Err(invalid(
            Distribution::Poisson,
            format!("mean must be non-negative; found {mean}"),
        ));
    }
    if mean == 0.0 {
        return Ok(0.0);
    }
    match boundary(u) {
        Boundary::Lower => Ok(0.0),
        Boundary::Upper => Ok(f64::INFINITY),
        Boundary::Interior => {
            let poisson =
                Poisson::new(mean).map_err(|err| invalid(Distribution::Poisson, err.to_string()))?;
            Ok(discrete_quantile(&poisson, u))
        }
    }
}

fn negative_binomial_quantile(u: f64, params: &[f64]) -> Result<f64, MarginalError> {
    let (size, probability) = negative_binomial_size_prob(params[0], params[1])?;
    match boundary(u) {
        Boundary::Lower => Ok(0.0),
        Boundary::Upper => Ok(f64::INFINITY),
        Boundary::Interior => {
            let negative_binomial = NegativeBinomial::new(size, probability)
                .map_err(|err| invalid(Distribution::NegativeBinomial, err.to_string()))?;
            Ok(discrete_quantile(&negative_binomial, u))
        }
    }
}

fn uniform_quantile(u: f64, params: &[f64]) -> Result<f64, MarginalError> {
    let (min, max) = (params[0], params[1]);
    if min > max {
        return Err(invalid(
            Distribution::Uniform,
            format!("minimum ({min}) must not exceed maximum ({max})"),
        ));
    }
    if min == max {
        return Ok(min);
    }
    match boundary(u) {
        Boundary::Lower => Ok(min),
        Boundary::Upper => Ok(max),
        Boundary::Interior => {
            let uniform = Uniform::new(min, max)
                .map_err(|err| invalid(Distribution::Uniform, err.to_string()))?;
            Ok(uniform.inverse_cdf(u))
        }
    }
}
