//! # Correlated column generation
//!
//! Entry points that append correlated columns to a [`UnitTable`] or build a
//! fresh one. Every input is checked before the first random number is
//! drawn: options, table, parameter counts, method, column names, the
//! correlation set and its factors, every row's parameter domain, and (for
//! Emrich-Piedmonte) the feasibility of every probability vector. Sampling then walks groups in ascending id
//! order with a single [`StdRng`] seeded from [`GeneratorOptions::seed`], so
//! identical inputs give bit-identical tables.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::binary::{BinaryError, EpPlan};
use crate::copula::{CopulaSampler, MultivariateNormal};
use crate::correlation::{
    CorrelationError, CorrelationFactor, CorrelationInput, CorrelationMatrix,
    CorrelationMatrixSet, CorrelationStructure, build_correlation_matrix,
};
use crate::evaluate::{EvaluationError, NoEvaluator, ParameterEvaluator};
use crate::input::{InputError, UnitTable};
use crate::marginal::{
    Distribution, MarginalError, MarginalSpec, ParamSource, check_parameters, transform,
};
use crate::shape::{
    KeyedValues, Shape, ShapeError, WorkingLayout, detect_shape, join_long, join_wide,
    resolve_names,
};

/// Errors returned by the generator entry points.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenerationError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    Binary(#[from] BinaryError),
    #[error(transparent)]
    Marginal(#[from] MarginalError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("method `{method}` cannot generate {distribution} variables")]
    UnsupportedMethod {
        method: Method,
        distribution: Distribution,
    },
    #[error("parameter {index} lists {found} per-variable values; expected {expected}")]
    ParameterLength {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("invalid generator options: {0}")]
    InvalidOptions(String),
}

/// Sampling method for the correlated draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Gaussian copula followed by a quantile transform.
    #[default]
    Copula,
    /// Emrich-Piedmonte; binary marginals only.
    EmrichPiedmonte,
}

impl FromStr for Method {
    type Err = GenerationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "copula" => Ok(Self::Copula),
            "ep" | "emrich_piedmonte" => Ok(Self::EmrichPiedmonte),
            other => Err(GenerationError::InvalidOptions(format!(
                "unknown method `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Copula => "copula",
            Self::EmrichPiedmonte => "ep",
        })
    }
}

/// Options shared by the generator entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorOptions {
    /// Number of new variables per subject in wide tables. Falls back to the
    /// dimension of an explicit matrix when unset.
    pub nvars: Option<usize>,
    pub correlation: CorrelationInput,
    pub method: Method,
    /// Output column names; `V1..Vk` (wide) or `X` (long) when unset.
    pub names: Option<Vec<String>>,
    pub seed: u64,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            nvars: None,
            correlation: CorrelationInput::default(),
            method: Method::Copula,
            names: None,
            seed: 42,
        }
    }
}

impl GeneratorOptions {
    #[must_use]
    pub const fn with_nvars(mut self, nvars: usize) -> Self {
        self.nvars = Some(nvars);
        self
    }

    #[must_use]
    pub fn with_structure(mut self, structure: CorrelationStructure, rho: f64) -> Self {
        self.correlation = CorrelationInput::Structure { structure, rho };
        self
    }

    #[must_use]
    pub fn with_matrix(mut self, matrix: CorrelationMatrix) -> Self {
        self.correlation = CorrelationInput::Matrix(matrix);
        self
    }

    /// One matrix per group, in ascending group-id order.
    #[must_use]
    pub fn with_group_matrices(mut self, matrices: Vec<CorrelationMatrix>) -> Self {
        self.correlation = CorrelationInput::PerGroup(matrices);
        self
    }

    #[must_use]
    pub const fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Variable count for wide tables.
    #[must_use]
    pub fn resolved_nvars(&self) -> Option<usize> {
        match (self.nvars, &self.correlation) {
            (Some(nvars), _) => Some(nvars),
            (None, CorrelationInput::Matrix(matrix)) => Some(matrix.dim()),
            (None, _) => None,
        }
    }

    /// # Errors
    ///
    /// Returns `GenerationError::InvalidOptions` if `nvars` is zero or
    /// disagrees with an explicit matrix, and
    /// `CorrelationError::InvalidCoefficient` for a non-finite `rho`.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.nvars == Some(0) {
            return Err(GenerationError::InvalidOptions(
                "nvars must be positive".to_string(),
            ));
        }
        match &self.correlation {
            CorrelationInput::Structure { rho, .. } if !rho.is_finite() => {
                Err(CorrelationError::InvalidCoefficient(*rho).into())
            }
            CorrelationInput::Matrix(matrix)
                if self.nvars.is_some_and(|nvars| nvars != matrix.dim()) =>
            {
                Err(GenerationError::InvalidOptions(format!(
                    "nvars ({}) must equal the correlation matrix dimension ({})",
                    self.nvars.unwrap_or_default(),
                    matrix.dim()
                )))
            }
            CorrelationInput::PerGroup(matrices) if matrices.is_empty() => Err(
                GenerationError::InvalidOptions("per-group matrix list is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Append correlated columns without a formula evaluator.
///
/// # Errors
///
/// See [`add_correlated_with`]. Formula parameters fail with
/// `EvaluationError::Unavailable`.
pub fn add_correlated(
    table: UnitTable,
    spec: &MarginalSpec,
    options: &GeneratorOptions,
) -> Result<UnitTable, GenerationError> {
    add_correlated_with(table, spec, options, &NoEvaluator)
}

/// Append correlated columns to `table`.
///
/// Wide tables (unique ids) receive `nvars` columns; long tables (repeated
/// ids) receive one column correlated within each id.
///
/// # Errors
///
/// Returns `GenerationError` if the options, table, or marginal specification
/// are invalid, if the correlation input does not fit the group sizes or is
/// not positive semi-definite, if a parameter cannot be resolved or lies
/// outside its distribution's domain, or if the method does not support the
/// distribution. No output is produced on error.
pub fn add_correlated_with<E>(
    table: UnitTable,
    spec: &MarginalSpec,
    options: &GeneratorOptions,
    evaluator: &E,
) -> Result<UnitTable, GenerationError>
where
    E: ParameterEvaluator + ?Sized,
{
    options.validate()?;
    table.validate()?;
    spec.validate()?;
    if options.method == Method::EmrichPiedmonte && spec.distribution != Distribution::Binary {
        return Err(GenerationError::UnsupportedMethod {
            method: options.method,
            distribution: spec.distribution,
        });
    }

    let shape = detect_shape(&table);
    let layout = match shape {
        Shape::Wide => {
            let nvars = options
                .resolved_nvars()
                .ok_or(ShapeError::MissingVariableCount)?;
            WorkingLayout::wide(&table, nvars)?
        }
        Shape::Long => {
            if options.nvars.is_some() {
                log::debug!("nvars is ignored for long tables");
            }
            WorkingLayout::long(&table)
        }
    };
    log::debug!(
        "{shape:?} table: {} rows in {} groups (largest {})",
        table.nrows(),
        layout.groups.n_groups(),
        layout.groups.max_group_size()
    );

    let names = resolve_names(
        shape,
        layout.groups.max_group_size(),
        options.names.as_deref(),
    )?;
    check_new_names(&table, &names)?;

    let set = CorrelationMatrixSet::resolve(&options.correlation, &layout.groups)?;
    let parameters = resolve_parameters(&table, spec, &layout, evaluator)?;
    check_parameter_domains(spec.distribution, &parameters, layout.nrows())?;

    let generated = match options.method {
        Method::Copula => sample_copula(spec.distribution, &set, &layout, &parameters, options.seed)?,
        Method::EmrichPiedmonte => sample_emrich_piedmonte(&set, &layout, &parameters, options.seed)?,
    };

    let table = match shape {
        Shape::Wide => join_wide(table, generated, &names)?,
        Shape::Long => join_long(table, generated, &names[0])?,
    };
    Ok(table)
}

/// Fresh wide table of `n` subjects with sequential ids `1..=n` and the
/// correlated columns.
///
/// # Errors
///
/// Returns `InputError::EmptyTable` if `n` is zero; otherwise see
/// [`add_correlated`].
pub fn generate_correlated(
    n: usize,
    spec: &MarginalSpec,
    options: &GeneratorOptions,
) -> Result<UnitTable, GenerationError> {
    add_correlated(UnitTable::with_sequential_ids("id", n), spec, options)
}

/// Fresh table of `n` multivariate-normal rows with the given means and
/// standard deviations.
///
/// Uses the structure or single matrix in `options.correlation`; column names
/// default to `V1..Vk`.
///
/// # Errors
///
/// Returns `GenerationError` if `means` and `sds` differ in length, a standard
/// deviation is negative or non-finite, the correlation input is per-group or
/// does not match the dimension, or `n` is zero.
pub fn generate_correlated_normal(
    n: usize,
    means: &[f64],
    sds: &[f64],
    options: &GeneratorOptions,
) -> Result<UnitTable, GenerationError> {
    options.validate()?;
    if n == 0 {
        return Err(InputError::EmptyTable.into());
    }
    if let Some(sd) = sds.iter().find(|sd| !(sd.is_finite() && **sd >= 0.0)) {
        return Err(MarginalError::InvalidParameter {
            distribution: Distribution::Normal,
            reason: format!("standard deviation must be non-negative; found {sd}"),
        }
        .into());
    }
    let dim = means.len();
    let matrix = match &options.correlation {
        CorrelationInput::Structure { structure, rho } => {
            build_correlation_matrix(dim, *structure, *rho)?
        }
        CorrelationInput::Matrix(matrix) => matrix.clone(),
        CorrelationInput::PerGroup(_) => {
            return Err(GenerationError::InvalidOptions(
                "multivariate normal draws take a single correlation matrix".to_string(),
            ));
        }
    };
    if matrix.dim() != dim {
        return Err(CorrelationError::DimensionMismatch {
            expected: dim,
            found: matrix.dim(),
        }
        .into());
    }
    let names = resolve_names(Shape::Wide, dim, options.names.as_deref())?;
    let mvn = MultivariateNormal::new(means, sds, CorrelationFactor::new(&matrix)?)?;

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut columns = vec![Vec::with_capacity(n); dim];
    for _ in 0..n {
        for (column, value) in columns.iter_mut().zip(mvn.sample(&mut rng)) {
            column.push(value);
        }
    }

    let mut table = UnitTable::with_sequential_ids("id", n);
    check_new_names(&table, &names)?;
    for (name, values) in names.into_iter().zip(columns) {
        table.push_column(name, values)?;
    }
    Ok(table)
}

fn check_new_names(table: &UnitTable, names: &[String]) -> Result<(), InputError> {
    for (idx, name) in names.iter().enumerate() {
        if table.has_column(name) || names[..idx].contains(name) {
            return Err(InputError::DuplicateColumn(name.clone()));
        }
    }
    Ok(())
}

/// Parameter values per source, indexed by working row.
fn resolve_parameters<E>(
    table: &UnitTable,
    spec: &MarginalSpec,
    layout: &WorkingLayout,
    evaluator: &E,
) -> Result<Vec<Vec<f64>>, GenerationError>
where
    E: ParameterEvaluator + ?Sized,
{
    let positions = layout.groups.max_group_size();
    let mut resolved = Vec::with_capacity(spec.params.len());
    for (index, source) in spec.params.iter().enumerate() {
        let values = match source {
            ParamSource::Constant(value) => vec![*value; layout.nrows()],
            ParamSource::Column(name) => {
                let column = table.require_column(name)?;
                layout.source_rows.iter().map(|&row| column[row]).collect()
            }
            ParamSource::PerVariable(values) => {
                if values.len() != positions {
                    return Err(GenerationError::ParameterLength {
                        index,
                        expected: positions,
                        found: values.len(),
                    });
                }
                layout.sequence.iter().map(|&position| values[position]).collect()
            }
            ParamSource::Formula { formula, link } => layout
                .source_rows
                .iter()
                .map(|&row| evaluator.evaluate(formula, &table.row(row), *link))
                .collect::<Result<_, _>>()?,
        };
        resolved.push(values);
    }
    Ok(resolved)
}

/// Every working row's parameters must lie in the distribution's domain.
fn check_parameter_domains(
    distribution: Distribution,
    parameters: &[Vec<f64>],
    nrows: usize,
) -> Result<(), MarginalError> {
    let mut row_params = Vec::with_capacity(parameters.len());
    for row in 0..nrows {
        row_params.clear();
        row_params.extend(parameters.iter().map(|values| values[row]));
        check_parameters(distribution, &row_params)?;
    }
    Ok(())
}

fn sample_copula(
    distribution: Distribution,
    set: &CorrelationMatrixSet,
    layout: &WorkingLayout,
    parameters: &[Vec<f64>],
    seed: u64,
) -> Result<KeyedValues, GenerationError> {
    let sampler = CopulaSampler::new(set)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut generated = KeyedValues::with_capacity(layout.nrows());
    let mut row_params = Vec::with_capacity(parameters.len());
    for group in &layout.groups.groups {
        let uniforms = sampler.sample_group(group, &mut rng)?;
        for (&row, u) in group.rows.iter().zip(uniforms) {
            row_params.clear();
            row_params.extend(parameters.iter().map(|values| values[row]));
            let value = transform(u, distribution, &row_params)?;
            generated.push(group.id.clone(), layout.sequence[row], value);
        }
    }
    Ok(generated)
}

fn sample_emrich_piedmonte(
    set: &CorrelationMatrixSet,
    layout: &WorkingLayout,
    parameters: &[Vec<f64>],
    seed: u64,
) -> Result<KeyedValues, GenerationError> {
    let probabilities = &parameters[0];
    let mut plans: Vec<EpPlan> = Vec::new();
    let mut cache: HashMap<Vec<u64>, usize> = HashMap::new();
    let mut group_plans = Vec::with_capacity(layout.groups.n_groups());
    for group in &layout.groups.groups {
        let probs = group
            .rows
            .iter()
            .map(|&row| probabilities[row])
            .collect::<Vec<_>>();
        let matrix = set.matrix_for(group)?;
        let mut key = probs.iter().map(|p| p.to_bits()).collect::<Vec<_>>();
        for i in 0..matrix.dim() {
            key.extend((0..i).map(|j| matrix.get(i, j).to_bits()));
        }
        let plan = match cache.get(&key) {
            Some(&plan) => plan,
            None => {
                plans.push(EpPlan::new(&probs, matrix)?);
                cache.insert(key, plans.len() - 1);
                plans.len() - 1
            }
        };
        group_plans.push(plan);
    }
    log::debug!(
        "prepared {} Emrich-Piedmonte plan(s) for {} groups",
        plans.len(),
        layout.groups.n_groups()
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let mut generated = KeyedValues::with_capacity(layout.nrows());
    for (group, &plan) in layout.groups.groups.iter().zip(&group_plans) {
        let draws = plans[plan].sample(&mut rng);
        for (&row, draw) in group.rows.iter().zip(draws) {
            generated.push(group.id.clone(), layout.sequence[row], f64::from(draw));
        }
    }
    Ok(generated)
}
