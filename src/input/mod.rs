//! # Unit tables
//!
//! Defines the light-weight in-memory table the generator reads parameters
//! from and appends correlated columns to: one identifier column plus any
//! number of named numeric columns.
//!
//! # Examples
//!
//! ```
//! use simcorr::UnitTable;
//!
//! let table = UnitTable::new("id", vec![1.into(), 2.into(), 3.into()])
//!     .with_column("lambda", vec![1.0, 2.5, 4.0]);
//!
//! assert!(table.validate().is_ok());
//! assert_eq!(table.column("lambda"), Some(&[1.0, 2.5, 4.0][..]));
//! ```
//!
//! ```
//! use simcorr::UnitTable;
//!
//! let table = UnitTable::new("id", vec![1.into(), 2.into()])
//!     .with_column("lambda", vec![1.0]);
//!
//! assert!(table.validate().is_err());
//! ```

use std::fmt;

use thiserror::Error;

pub mod grouping;

pub use grouping::{Group, GroupLayout};

/// Errors returned when validating or extending unit tables.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("table must contain at least one row")]
    EmptyTable,
    #[error("column `{name}` has {len} values but the table has {rows} rows")]
    ColumnLengthMismatch {
        name: String,
        len: usize,
        rows: usize,
    },
    #[error("column `{0}` appears more than once")]
    DuplicateColumn(String),
    #[error("column `{0}` does not exist")]
    MissingColumn(String),
}

/// Identifier of a unit; integer and text ids are both accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitId {
    Int(i64),
    Text(String),
}

impl From<i64> for UnitId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for UnitId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for UnitId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// A named numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// Identifier column plus numeric columns, one entry per unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTable {
    id_name: String,
    ids: Vec<UnitId>,
    columns: Vec<Column>,
}

impl UnitTable {
    #[must_use]
    pub fn new(id_name: impl Into<String>, ids: Vec<UnitId>) -> Self {
        Self {
            id_name: id_name.into(),
            ids,
            columns: Vec::new(),
        }
    }

    /// Table with integer ids `1..=n`.
    #[must_use]
    pub fn with_sequential_ids(id_name: impl Into<String>, n: usize) -> Self {
        let ids = (1..=n)
            .map(|idx| UnitId::Int(i64::try_from(idx).unwrap_or(i64::MAX)))
            .collect();
        Self::new(id_name, ids)
    }

    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.push(Column {
            name: name.into(),
            values,
        });
        self
    }

    #[must_use]
    pub fn id_name(&self) -> &str {
        &self.id_name
    }

    #[must_use]
    pub fn ids(&self) -> &[UnitId] {
        &self.ids
    }

    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        name == self.id_name || self.columns.iter().any(|column| column.name == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.values.as_slice())
    }

    /// # Errors
    ///
    /// Returns `InputError::MissingColumn` if `name` is not a numeric column.
    pub fn require_column(&self, name: &str) -> Result<&[f64], InputError> {
        self.column(name)
            .ok_or_else(|| InputError::MissingColumn(name.to_string()))
    }

    /// Append a column after checking its length and name.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the length differs from the row count or the
    /// name is already taken.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), InputError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(InputError::DuplicateColumn(name));
        }
        if values.len() != self.nrows() {
            return Err(InputError::ColumnLengthMismatch {
                name,
                len: values.len(),
                rows: self.nrows(),
            });
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Read-only view of one row for parameter evaluation.
    #[must_use]
    pub const fn row(&self, row: usize) -> RowContext<'_> {
        RowContext { table: self, row }
    }

    /// Validate shapes and names.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the table is empty, a column has the wrong
    /// length, or a name repeats.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.ids.is_empty() {
            return Err(InputError::EmptyTable);
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if column.values.len() != self.nrows() {
                return Err(InputError::ColumnLengthMismatch {
                    name: column.name.clone(),
                    len: column.values.len(),
                    rows: self.nrows(),
                });
            }
            if column.name == self.id_name
                || self.columns[..idx]
                    .iter()
                    .any(|earlier| earlier.name == column.name)
            {
                return Err(InputError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(())
    }
}

/// One row of a [`UnitTable`], as seen by a parameter evaluator.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    table: &'a UnitTable,
    row: usize,
}

impl<'a> RowContext<'a> {
    #[must_use]
    pub fn id(&self) -> &'a UnitId {
        &self.table.ids[self.row]
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.row
    }

    /// Value of a numeric column in this row.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.table.column(name).map(|values| values[self.row])
    }
}
