//! # Wide and long layouts
//!
//! A table whose ids never repeat is *wide*: every subject receives `nvars`
//! new columns. A table with repeated ids is *long*: each row receives one
//! new value, correlated with the other rows of its id.
//!
//! Both shapes are reduced to the same working layout, a list of groups over
//! working rows. For wide input each subject is expanded into `nvars`
//! synthetic rows with sequence `1..=nvars`; long input uses its own repeat
//! structure. Generated values are keyed by `(id, sequence)` and joined back
//! onto the caller's table with a strict equi-join.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::input::{GroupLayout, InputError, UnitId, UnitTable};

/// Default name of the single generated column in long layouts.
pub const DEFAULT_LONG_NAME: &str = "X";

/// Errors raised while shaping inputs and outputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("expected {expected} column name(s); found {found}")]
    NameCountMismatch { expected: usize, found: usize },
    #[error("wide input requires a positive number of variables")]
    MissingVariableCount,
    #[error("generated values do not line up with the input table at id {id}")]
    InconsistentJoin { id: String },
    #[error(transparent)]
    Input(#[from] InputError),
}

/// Layout of the caller's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One row per id.
    Wide,
    /// Repeated ids.
    Long,
}

/// Wide if no id repeats, long otherwise.
#[must_use]
pub fn detect_shape(table: &UnitTable) -> Shape {
    let mut counts: HashMap<&UnitId, usize> = HashMap::new();
    let mut max_repeat = 0usize;
    for id in table.ids() {
        let count = counts.entry(id).or_insert(0);
        *count += 1;
        max_repeat = max_repeat.max(*count);
    }
    if max_repeat > 1 { Shape::Long } else { Shape::Wide }
}

/// Working rows, their groups, and the original rows they read parameters from.
#[derive(Debug, Clone)]
pub struct WorkingLayout {
    pub shape: Shape,
    pub groups: GroupLayout,
    /// Working row to original table row.
    pub source_rows: Vec<usize>,
    /// Working row to zero-based within-group sequence.
    pub sequence: Vec<usize>,
}

impl WorkingLayout {
    /// Expand each subject into `nvars` rows.
    ///
    /// # Errors
    ///
    /// Returns `ShapeError::MissingVariableCount` if `nvars` is zero.
    pub fn wide(table: &UnitTable, nvars: usize) -> Result<Self, ShapeError> {
        if nvars == 0 {
            return Err(ShapeError::MissingVariableCount);
        }
        let total = table.nrows() * nvars;
        let mut ids = Vec::with_capacity(total);
        let mut source_rows = Vec::with_capacity(total);
        let mut sequence = Vec::with_capacity(total);
        for (row, id) in table.ids().iter().enumerate() {
            for position in 0..nvars {
                ids.push(id.clone());
                source_rows.push(row);
                sequence.push(position);
            }
        }
        Ok(Self {
            shape: Shape::Wide,
            groups: GroupLayout::from_ids(&ids),
            source_rows,
            sequence,
        })
    }

    /// Use the table's own repeat structure.
    #[must_use]
    pub fn long(table: &UnitTable) -> Self {
        let groups = GroupLayout::from_ids(table.ids());
        let sequence = groups.row_sequence();
        Self {
            shape: Shape::Long,
            groups,
            source_rows: (0..table.nrows()).collect(),
            sequence,
        }
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.source_rows.len()
    }
}

/// Names of the generated columns.
///
/// # Errors
///
/// Returns `ShapeError::NameCountMismatch` if caller names do not number
/// `nvars` (wide) or exactly one (long).
pub fn resolve_names(
    shape: Shape,
    nvars: usize,
    names: Option<&[String]>,
) -> Result<Vec<String>, ShapeError> {
    let expected = match shape {
        Shape::Wide => nvars,
        Shape::Long => 1,
    };
    match names {
        Some(names) if names.len() != expected => Err(ShapeError::NameCountMismatch {
            expected,
            found: names.len(),
        }),
        Some(names) => Ok(names.to_vec()),
        None => Ok(match shape {
            Shape::Wide => (1..=nvars).map(|idx| format!("V{idx}")).collect(),
            Shape::Long => vec![DEFAULT_LONG_NAME.to_string()],
        }),
    }
}

/// Generated values keyed by `(id, zero-based sequence)`, in traversal order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedValues {
    pub keys: Vec<(UnitId, usize)>,
    pub values: Vec<f64>,
}

impl KeyedValues {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, id: UnitId, sequence: usize, value: f64) {
        self.keys.push((id, sequence));
        self.values.push(value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn inconsistent(id: &UnitId) -> ShapeError {
    ShapeError::InconsistentJoin { id: id.to_string() }
}

/// Pivot wide values into one column per sequence position and join by id.
///
/// # Errors
///
/// Returns `ShapeError::InconsistentJoin` if any id is missing on either
/// side or a position is missing, and `ShapeError::Input` if a name is taken.
pub fn join_wide(
    mut table: UnitTable,
    generated: KeyedValues,
    names: &[String],
) -> Result<UnitTable, ShapeError> {
    let nvars = names.len();
    let mut by_id: BTreeMap<UnitId, Vec<Option<f64>>> = BTreeMap::new();
    for ((id, position), value) in generated.keys.into_iter().zip(generated.values) {
        if position >= nvars {
            return Err(inconsistent(&id));
        }
        by_id.entry(id).or_insert_with(|| vec![None; nvars])[position] = Some(value);
    }
    if by_id.len() != table.nrows() {
        let orphan = by_id
            .keys()
            .find(|id| !table.ids().contains(id))
            .or_else(|| table.ids().first())
            .cloned()
            .unwrap_or(UnitId::Int(0));
        return Err(inconsistent(&orphan));
    }

    let mut columns = vec![Vec::with_capacity(table.nrows()); nvars];
    for id in table.ids() {
        let values = by_id.get(id).ok_or_else(|| inconsistent(id))?;
        for (column, value) in columns.iter_mut().zip(values) {
            column.push(value.ok_or_else(|| inconsistent(id))?);
        }
    }
    for (name, values) in names.iter().zip(columns) {
        table.push_column(name.clone(), values)?;
    }
    Ok(table)
}

/// Join long values back by `(id, sequence)`, preserving the table's row order.
///
/// # Errors
///
/// Returns `ShapeError::InconsistentJoin` if the keys on both sides differ,
/// and `ShapeError::Input` if the name is taken.
pub fn join_long(
    mut table: UnitTable,
    generated: KeyedValues,
    name: &str,
) -> Result<UnitTable, ShapeError> {
    let sequence = GroupLayout::from_ids(table.ids()).row_sequence();
    let mut lookup: HashMap<(UnitId, usize), f64> = generated
        .keys
        .into_iter()
        .zip(generated.values)
        .collect();
    if lookup.len() != table.nrows() {
        let id = lookup
            .keys()
            .next()
            .map_or(UnitId::Int(0), |(id, _)| id.clone());
        return Err(inconsistent(&id));
    }

    let mut column = Vec::with_capacity(table.nrows());
    for (id, position) in table.ids().iter().zip(sequence) {
        let value = lookup
            .remove(&(id.clone(), position))
            .ok_or_else(|| inconsistent(id))?;
        column.push(value);
    }
    table.push_column(name, column)?;
    Ok(table)
}
