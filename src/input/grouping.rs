//! Grouping of unit rows by identifier.
//!
//! A group collects every row sharing one id. Groups are ordered by id and
//! rows within a group keep their order of appearance, which defines the
//! within-group sequence `1..=size`.

use std::collections::BTreeMap;

use super::UnitId;

/// Row indices of one group, in sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: UnitId,
    pub rows: Vec<usize>,
}

impl Group {
    #[must_use]
    pub fn size(&self) -> usize {
        self.rows.len()
    }
}

/// All groups of a table, ascending by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLayout {
    pub groups: Vec<Group>,
    pub nrows: usize,
}

impl GroupLayout {
    #[must_use]
    pub fn from_ids(ids: &[UnitId]) -> Self {
        let mut grouped: BTreeMap<&UnitId, Vec<usize>> = BTreeMap::new();
        for (row, id) in ids.iter().enumerate() {
            grouped.entry(id).or_default().push(row);
        }

        let groups = grouped
            .into_iter()
            .map(|(id, rows)| Group {
                id: id.clone(),
                rows,
            })
            .collect();

        Self {
            groups,
            nrows: ids.len(),
        }
    }

    #[must_use]
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        self.groups.iter().map(Group::size).collect()
    }

    #[must_use]
    pub fn max_group_size(&self) -> usize {
        self.groups.iter().map(Group::size).max().unwrap_or(0)
    }

    /// Whether every group has the same size.
    #[must_use]
    pub fn is_homogeneous(&self) -> bool {
        let mut sizes = self.groups.iter().map(Group::size);
        sizes
            .next()
            .is_none_or(|first| sizes.all(|size| size == first))
    }

    /// For each row, its zero-based position within its group.
    #[must_use]
    pub fn row_sequence(&self) -> Vec<usize> {
        let mut sequence = vec![usize::MAX; self.nrows];
        for group in &self.groups {
            for (position, row) in group.rows.iter().enumerate() {
                sequence[*row] = position;
            }
        }
        debug_assert!(sequence.iter().all(|idx| *idx != usize::MAX));
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_rows_by_id_in_sorted_order() {
        let ids: Vec<UnitId> = vec![11.into(), 10.into(), 11.into(), 10.into(), 12.into()];
        let layout = GroupLayout::from_ids(&ids);
        assert_eq!(layout.n_groups(), 3);
        assert_eq!(layout.groups[0].id, UnitId::Int(10));
        assert_eq!(layout.groups[0].rows, vec![1, 3]);
        assert_eq!(layout.groups[1].rows, vec![0, 2]);
        assert_eq!(layout.sizes(), vec![2, 2, 1]);
        assert_eq!(layout.max_group_size(), 2);
        assert!(!layout.is_homogeneous());
    }

    #[test]
    fn row_sequence_counts_within_group() {
        let ids: Vec<UnitId> = vec!["a".into(), "b".into(), "a".into(), "a".into()];
        let layout = GroupLayout::from_ids(&ids);
        assert_eq!(layout.row_sequence(), vec![0, 0, 1, 2]);
    }

    #[test]
    fn singleton_groups_are_homogeneous() {
        let ids: Vec<UnitId> = vec![1.into(), 2.into(), 3.into()];
        let layout = GroupLayout::from_ids(&ids);
        assert!(layout.is_homogeneous());
        assert_eq!(layout.max_group_size(), 1);
    }
}
