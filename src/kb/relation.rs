//! A single relation: sorted integer tuples plus per-column indices.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::KbError;

/// Fixed-arity set of constant tuples.
///
/// Rows are stored flat, sorted lexicographically and deduplicated, so a row
/// id is stable for the lifetime of the relation and membership is a binary
/// search. Each column keeps a `value -> sorted row ids` index.
#[derive(Debug, Clone)]
pub struct Relation {
    id: usize,
    name: String,
    arity: usize,
    data: Vec<u32>,
    entailed: Vec<bool>,
    entailed_count: usize,
    columns: Vec<HashMap<u32, Vec<u32>>>,
}

impl Relation {
    /// Builds a relation from records. Duplicates are dropped.
    ///
    /// # Errors
    /// Returns [`KbError::ArityMismatch`] if a record has the wrong length.
    pub fn new(
        id: usize,
        name: impl Into<String>,
        arity: usize,
        records: Vec<Vec<u32>>,
    ) -> Result<Self, KbError> {
        let name = name.into();
        if let Some(bad) = records.iter().find(|r| r.len() != arity) {
            return Err(KbError::ArityMismatch {
                name,
                expected: arity,
                actual: bad.len(),
            });
        }
        let data = records.into_iter().flatten().collect();
        Ok(Self::from_flat(id, name, arity, data))
    }

    /// Builds a relation from flat row-major data (`data.len()` must be a
    /// multiple of `arity`; a trailing partial row is ignored).
    #[must_use]
    pub fn from_flat(id: usize, name: impl Into<String>, arity: usize, data: Vec<u32>) -> Self {
        let data = sort_dedup(arity, data);
        let rows = if arity == 0 { 0 } else { data.len() / arity };
        let mut relation = Self {
            id,
            name: name.into(),
            arity,
            data,
            entailed: vec![false; rows],
            entailed_count: 0,
            columns: Vec::new(),
        };
        relation.build_index();
        relation
    }

    fn build_index(&mut self) {
        let mut columns: Vec<HashMap<u32, Vec<u32>>> = vec![HashMap::new(); self.arity];
        for (row_id, row) in self.rows().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let row_id = row_id as u32;
            for (col, &value) in row.iter().enumerate() {
                columns[col].entry(value).or_default().push(row_id);
            }
        }
        self.columns = columns;
    }

    /// Relation id (position in the KB).
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of arguments.
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.arity
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entailed.len()
    }

    /// True if the relation has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entailed.is_empty()
    }

    /// Row-major data of all rows.
    #[must_use]
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    /// Arguments of one row.
    ///
    /// # Panics
    /// Panics if `row` is out of bounds.
    #[must_use]
    pub fn row(&self, row: usize) -> &[u32] {
        &self.data[row * self.arity..(row + 1) * self.arity]
    }

    /// All rows in lexicographic order.
    pub fn rows(&self) -> impl Iterator<Item = &[u32]> + '_ {
        let arity = self.arity.max(1);
        self.data.chunks_exact(arity).take(self.len())
    }

    /// Row id of `record`, if present.
    #[must_use]
    pub fn find(&self, record: &[u32]) -> Option<usize> {
        if record.len() != self.arity {
            return None;
        }
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.row(mid).cmp(record) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// True if `record` is a row.
    #[must_use]
    pub fn contains(&self, record: &[u32]) -> bool {
        self.find(record).is_some()
    }

    /// Sorted ids of rows whose column `col` holds `value`.
    #[must_use]
    pub fn rows_with(&self, col: usize, value: u32) -> &[u32] {
        self.columns
            .get(col)
            .and_then(|index| index.get(&value))
            .map_or(&[], Vec::as_slice)
    }

    /// Number of rows whose column `col` holds `value`.
    #[must_use]
    pub fn frequency(&self, col: usize, value: u32) -> usize {
        self.rows_with(col, value).len()
    }

    /// Number of distinct values in column `col`.
    #[must_use]
    pub fn distinct(&self, col: usize) -> usize {
        self.columns.get(col).map_or(0, HashMap::len)
    }

    /// Distinct values of column `col`, sorted.
    #[must_use]
    pub fn column_values(&self, col: usize) -> Vec<u32> {
        let mut values: Vec<u32> = self
            .columns
            .get(col)
            .map(|index| index.keys().copied().collect())
            .unwrap_or_default();
        values.sort_unstable();
        values
    }

    /// Row ids of the relation present in `candidates`.
    ///
    /// `candidates` is row-major, sorted lexicographically and deduplicated;
    /// the intersection is computed by a single merge pass.
    #[must_use]
    pub fn intersect_sorted(&self, candidates: &[u32]) -> Vec<usize> {
        let mut out = Vec::new();
        if self.arity == 0 {
            return out;
        }
        let mut others = candidates.chunks_exact(self.arity).peekable();
        let mut row = 0usize;
        while row < self.len() {
            let Some(&other) = others.peek() else { break };
            match self.row(row).cmp(other) {
                Ordering::Less => row += 1,
                Ordering::Greater => {
                    others.next();
                }
                Ordering::Equal => {
                    out.push(row);
                    row += 1;
                    others.next();
                }
            }
        }
        out
    }

    /// Marks rows as entailed. Monotonic and idempotent; returns how many
    /// rows were newly marked. Out-of-range ids are ignored.
    pub fn mark_entailed(&mut self, rows: impl IntoIterator<Item = usize>) -> usize {
        let mut newly = 0;
        for row in rows {
            if let Some(flag) = self.entailed.get_mut(row) {
                if !*flag {
                    *flag = true;
                    newly += 1;
                }
            }
        }
        self.entailed_count += newly;
        newly
    }

    /// True if the row has been marked entailed.
    #[must_use]
    pub fn is_entailed(&self, row: usize) -> bool {
        self.entailed.get(row).copied().unwrap_or(false)
    }

    /// Number of entailed rows.
    #[must_use]
    pub const fn entailed_count(&self) -> usize {
        self.entailed_count
    }

    /// Ids of rows not (yet) entailed.
    #[must_use]
    pub fn residual_rows(&self) -> Vec<usize> {
        (0..self.len()).filter(|&r| !self.entailed[r]).collect()
    }

    /// Per column, the constants occupying at least
    /// `ceil(rows * min_constant_coverage)` rows, sorted.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn promising_constants(&self, min_constant_coverage: f64) -> Vec<Vec<u32>> {
        let threshold = ((self.len() as f64 * min_constant_coverage).ceil() as usize).max(1);
        self.columns
            .iter()
            .map(|index| {
                let mut constants: Vec<u32> = index
                    .iter()
                    .filter(|(_, rows)| rows.len() >= threshold)
                    .map(|(&value, _)| value)
                    .collect();
                constants.sort_unstable();
                constants
            })
            .collect()
    }

    /// Merges new records in, keeping entailment marks of existing rows.
    ///
    /// # Errors
    /// Returns [`KbError::ArityMismatch`] if a record has the wrong length.
    pub fn add_records(&mut self, records: Vec<Vec<u32>>) -> Result<usize, KbError> {
        if let Some(bad) = records.iter().find(|r| r.len() != self.arity) {
            return Err(KbError::ArityMismatch {
                name: self.name.clone(),
                expected: self.arity,
                actual: bad.len(),
            });
        }
        let before = self.len();
        let entailed: Vec<Vec<u32>> = (0..before)
            .filter(|&r| self.entailed[r])
            .map(|r| self.row(r).to_vec())
            .collect();
        let mut data = std::mem::take(&mut self.data);
        data.extend(records.into_iter().flatten());
        let rebuilt = Self::from_flat(self.id, std::mem::take(&mut self.name), self.arity, data);
        *self = rebuilt;
        let rows: Vec<usize> = entailed.iter().filter_map(|r| self.find(r)).collect();
        self.mark_entailed(rows);
        Ok(self.len() - before)
    }
}

fn sort_dedup(arity: usize, data: Vec<u32>) -> Vec<u32> {
    if arity == 0 {
        return Vec::new();
    }
    let mut rows: Vec<&[u32]> = data.chunks_exact(arity).collect();
    rows.sort_unstable();
    rows.dedup();
    rows.into_iter().flatten().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> Relation {
        Relation::new(
            0,
            "parent",
            2,
            vec![vec![2, 3], vec![1, 2], vec![1, 3], vec![2, 3], vec![4, 1]],
        )
        .unwrap()
    }

    #[test]
    fn test_rows_sorted_and_deduplicated() {
        let rel = family();
        assert_eq!(rel.len(), 4);
        let rows: Vec<&[u32]> = rel.rows().collect();
        assert_eq!(rows, vec![&[1, 2][..], &[1, 3], &[2, 3], &[4, 1]]);
    }

    #[test]
    fn test_find_and_contains() {
        let rel = family();
        assert_eq!(rel.find(&[2, 3]), Some(2));
        assert!(rel.contains(&[4, 1]));
        assert!(!rel.contains(&[3, 3]));
        assert!(!rel.contains(&[1]));
    }

    #[test]
    fn test_column_index() {
        let rel = family();
        assert_eq!(rel.rows_with(0, 1), &[0, 1]);
        assert_eq!(rel.rows_with(1, 3), &[1, 2]);
        assert!(rel.rows_with(1, 9).is_empty());
        assert_eq!(rel.distinct(0), 3);
        assert_eq!(rel.column_values(1), vec![1, 2, 3]);
    }

    #[test]
    fn test_intersect_sorted() {
        let rel = family();
        let candidates = [1, 3, 2, 2, 2, 3, 5, 5];
        assert_eq!(rel.intersect_sorted(&candidates), vec![1, 2]);
    }

    #[test]
    fn test_mark_entailed_is_monotonic_and_idempotent() {
        let mut rel = family();
        assert_eq!(rel.mark_entailed([0, 2]), 2);
        assert_eq!(rel.mark_entailed([2, 3, 99]), 1);
        assert_eq!(rel.entailed_count(), 3);
        assert!(rel.is_entailed(0));
        assert!(!rel.is_entailed(1));
        assert_eq!(rel.residual_rows(), vec![1]);
    }

    #[test]
    fn test_promising_constants() {
        let rel = family();
        // ceil(4 * 0.5) = 2 rows.
        let constants = rel.promising_constants(0.5);
        assert_eq!(constants[0], vec![1]);
        assert_eq!(constants[1], vec![3]);
    }

    #[test]
    fn test_add_records_keeps_marks() {
        let mut rel = family();
        rel.mark_entailed([3]);
        let added = rel.add_records(vec![vec![0, 9], vec![1, 2]]).unwrap();
        assert_eq!(added, 1);
        assert_eq!(rel.row(0), &[0, 9]);
        let row = rel.find(&[4, 1]).unwrap();
        assert!(rel.is_entailed(row));
        assert_eq!(rel.entailed_count(), 1);
    }

    #[test]
    fn test_arity_mismatch() {
        let err = Relation::new(0, "r", 2, vec![vec![1, 2, 3]]).unwrap_err();
        assert!(format!("{err}").contains("arity 2"));
    }
}
