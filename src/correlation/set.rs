//! Correlation matrices resolved against a group layout.

use std::collections::BTreeMap;

use crate::input::{Group, GroupLayout, UnitId};

use super::{
    CorrelationError, CorrelationMatrix, CorrelationStructure, build_correlation_matrix,
};

/// How the caller specifies within-group correlation.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationInput {
    /// Structure keyword plus coefficient; dimension follows each group size.
    Structure {
        structure: CorrelationStructure,
        rho: f64,
    },
    /// One explicit matrix shared by every group.
    Matrix(CorrelationMatrix),
    /// One explicit matrix per group, in ascending group-id order.
    PerGroup(Vec<CorrelationMatrix>),
}

impl Default for CorrelationInput {
    fn default() -> Self {
        Self::Structure {
            structure: CorrelationStructure::Independence,
            rho: 0.0,
        }
    }
}

/// Matrices ready for sampling, keyed the way groups look them up.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationMatrixSet {
    /// A single matrix for homogeneous group sizes.
    Uniform(CorrelationMatrix),
    /// Structural matrices built once per distinct group size.
    BySize(BTreeMap<usize, CorrelationMatrix>),
    /// Explicit matrices, one per group id.
    PerGroup(BTreeMap<UnitId, CorrelationMatrix>),
}

impl CorrelationMatrixSet {
    /// Resolve the caller's specification against the group layout.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::DimensionMismatch` if an explicit matrix does
    /// not match its group's size or the number of per-group matrices differs
    /// from the number of groups; structural errors propagate from
    /// [`build_correlation_matrix`].
    pub fn resolve(
        input: &CorrelationInput,
        layout: &GroupLayout,
    ) -> Result<Self, CorrelationError> {
        match input {
            CorrelationInput::Structure { structure, rho } => {
                if layout.is_homogeneous() {
                    let dim = layout.max_group_size();
                    return Ok(Self::Uniform(build_correlation_matrix(dim, *structure, *rho)?));
                }
                let mut by_size = BTreeMap::new();
                for size in layout.sizes() {
                    if !by_size.contains_key(&size) {
                        by_size.insert(size, build_correlation_matrix(size, *structure, *rho)?);
                    }
                }
                log::debug!(
                    "built {} structural correlation matrices for {} groups",
                    by_size.len(),
                    layout.n_groups()
                );
                Ok(Self::BySize(by_size))
            }
            CorrelationInput::Matrix(matrix) => {
                if let Some(group) = layout.groups.iter().find(|group| group.size() != matrix.dim()) {
                    return Err(CorrelationError::DimensionMismatch {
                        expected: group.size(),
                        found: matrix.dim(),
                    });
                }
                Ok(Self::Uniform(matrix.clone()))
            }
            CorrelationInput::PerGroup(matrices) => {
                if matrices.len() != layout.n_groups() {
                    return Err(CorrelationError::DimensionMismatch {
                        expected: layout.n_groups(),
                        found: matrices.len(),
                    });
                }
                let mut per_group = BTreeMap::new();
                for (group, matrix) in layout.groups.iter().zip(matrices) {
                    if group.size() != matrix.dim() {
                        return Err(CorrelationError::DimensionMismatch {
                            expected: group.size(),
                            found: matrix.dim(),
                        });
                    }
                    per_group.insert(group.id.clone(), matrix.clone());
                }
                Ok(Self::PerGroup(per_group))
            }
        }
    }

    /// Matrix for one group.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::DimensionMismatch` if no matrix of the
    /// group's size is available.
    pub fn matrix_for(&self, group: &Group) -> Result<&CorrelationMatrix, CorrelationError> {
        let matrix = match self {
            Self::Uniform(matrix) => Some(matrix),
            Self::BySize(by_size) => by_size.get(&group.size()),
            Self::PerGroup(per_group) => per_group.get(&group.id),
        };
        match matrix {
            Some(matrix) if matrix.dim() == group.size() => Ok(matrix),
            Some(matrix) => Err(CorrelationError::DimensionMismatch {
                expected: group.size(),
                found: matrix.dim(),
            }),
            None => Err(CorrelationError::DimensionMismatch {
                expected: group.size(),
                found: 0,
            }),
        }
    }

    /// Number of distinct matrices held.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Uniform(_) => 1,
            Self::BySize(by_size) => by_size.len(),
            Self::PerGroup(per_group) => per_group.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
