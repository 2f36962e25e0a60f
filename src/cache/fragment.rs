//! Cache fragments: materialized groundings of a connected set of literals.
//!
//! A fragment stores, for each grounding, one row id per literal (flat, with
//! a stride of `literals.len()`). Fragments are immutable; every operation
//! derives a new fragment from an existing one.

use std::collections::HashMap;

use crate::error::{RelcompError, RelcompResult};
use crate::kb::{KnowledgeBase, Relation};
use crate::rule::{ArgLoc, Rule};

/// Groundings of a connected literal set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    literals: Vec<usize>,
    entries: Vec<u32>,
}

/// Reads one argument value out of fragment entries.
#[derive(Clone, Copy)]
pub(crate) struct Column<'a> {
    rel: &'a Relation,
    slot: usize,
    position: usize,
}

impl Column<'_> {
    #[inline]
    pub(crate) fn get(&self, entry: &[u32]) -> u32 {
        self.rel.row(entry[self.slot] as usize)[self.position]
    }
}

impl Fragment {
    /// Fragment over a single literal, one entry per given row.
    pub fn single(literal: usize, rows: impl IntoIterator<Item = u32>) -> Self {
        Self {
            literals: vec![literal],
            entries: rows.into_iter().collect(),
        }
    }

    /// Rule literal indices covered, in slot order.
    #[must_use]
    pub fn literals(&self) -> &[usize] {
        &self.literals
    }

    /// True if the fragment covers `literal`.
    #[must_use]
    pub fn covers(&self, literal: usize) -> bool {
        self.literals.contains(&literal)
    }

    /// Slot of a literal in each entry.
    #[must_use]
    pub fn slot(&self, literal: usize) -> Option<usize> {
        self.literals.iter().position(|&l| l == literal)
    }

    fn width(&self) -> usize {
        self.literals.len().max(1)
    }

    /// Number of groundings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() / self.width()
    }

    /// True if there are no groundings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All groundings.
    pub fn entries(&self) -> impl Iterator<Item = &[u32]> + '_ {
        self.entries.chunks_exact(self.width())
    }

    /// Grounding by index.
    #[must_use]
    pub fn entry(&self, idx: usize) -> &[u32] {
        let w = self.width();
        &self.entries[idx * w..(idx + 1) * w]
    }

    pub(crate) fn column<'a>(
        &self,
        rule: &Rule,
        kb: &'a KnowledgeBase,
        loc: ArgLoc,
    ) -> RelcompResult<Column<'a>> {
        let slot = self
            .slot(loc.literal)
            .ok_or_else(|| RelcompError::internal(format!("literal {} not in fragment", loc.literal)))?;
        let rel = rule
            .literals()
            .get(loc.literal)
            .and_then(|lit| kb.relation(lit.relation))
            .ok_or_else(|| RelcompError::internal(format!("literal {} has no relation", loc.literal)))?;
        if loc.position >= rel.arity() {
            return Err(RelcompError::internal(format!(
                "position {} out of range for '{}'",
                loc.position,
                rel.name()
            )));
        }
        Ok(Column {
            rel,
            slot,
            position: loc.position,
        })
    }

    /// Keeps groundings where the arguments at `a` and `b` are equal.
    pub(crate) fn filter_eq(&self, a: Column<'_>, b: Column<'_>) -> Self {
        self.retain(|entry| a.get(entry) == b.get(entry))
    }

    /// Keeps groundings where the argument at `col` equals `constant`.
    pub(crate) fn filter_const(&self, col: Column<'_>, constant: u32) -> Self {
        self.retain(|entry| col.get(entry) == constant)
    }

    fn retain(&self, keep: impl Fn(&[u32]) -> bool) -> Self {
        let mut entries = Vec::new();
        for entry in self.entries() {
            if keep(entry) {
                entries.extend_from_slice(entry);
            }
        }
        Self {
            literals: self.literals.clone(),
            entries,
        }
    }

    /// Appends `literal` (over `rel`), joining its `position` column with the
    /// existing argument `anchor`.
    pub(crate) fn extend(&self, literal: usize, rel: &Relation, position: usize, anchor: Column<'_>) -> Self {
        let mut entries = Vec::new();
        for entry in self.entries() {
            for &row in rel.rows_with(position, anchor.get(entry)) {
                entries.extend_from_slice(entry);
                entries.push(row);
            }
        }
        let mut literals = self.literals.clone();
        literals.push(literal);
        Self { literals, entries }
    }

    /// Merges two fragments on `a == b` (hash join, building on `other`).
    pub(crate) fn join(&self, a: Column<'_>, other: &Self, b: Column<'_>) -> Self {
        let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
        for (idx, entry) in other.entries().enumerate() {
            index.entry(b.get(entry)).or_default().push(idx);
        }
        let mut entries = Vec::new();
        for entry in self.entries() {
            if let Some(matches) = index.get(&a.get(entry)) {
                for &idx in matches {
                    entries.extend_from_slice(entry);
                    entries.extend_from_slice(other.entry(idx));
                }
            }
        }
        let mut literals = self.literals.clone();
        literals.extend_from_slice(&other.literals);
        Self { literals, entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Link, SpecOp};

    fn kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("t");
        kb.add_records("p", &[vec!["a", "b"], vec!["b", "c"], vec!["c", "a"], vec!["a", "a"]])
            .unwrap();
        kb
    }

    #[test]
    fn test_extend_and_filter() {
        let kb = kb();
        let rel = kb.relation(0).unwrap();
        // p(X0,?) :- p(?,X0)
        let rule = Rule::most_general(0, 2)
            .apply(&SpecOp::AddLiteral {
                relation: 0,
                arity: 2,
                position: 1,
                link: Link::Slot(ArgLoc::new(0, 0)),
            })
            .unwrap();
        let base = Fragment::single(0, 0..4);
        let anchor = base.column(&rule, &kb, ArgLoc::new(0, 0)).unwrap();
        let joined = base.extend(1, rel, 1, anchor);
        // Head rows starting with a pair with p(a,a) and p(c,a); b and c
        // each have one predecessor.
        assert_eq!(joined.len(), 6);
        assert_eq!(joined.literals(), &[0, 1]);

        let head_second = joined.column(&rule, &kb, ArgLoc::new(0, 1)).unwrap();
        let body_first = joined.column(&rule, &kb, ArgLoc::new(1, 0)).unwrap();
        let filtered = joined.filter_eq(head_second, body_first);
        assert_eq!(filtered.len(), 1);

        let a = kb.dictionary().id("a").unwrap();
        let only_a = base.filter_const(base.column(&rule, &kb, ArgLoc::new(0, 0)).unwrap(), a);
        assert_eq!(only_a.len(), 2);
    }

    #[test]
    fn test_join() {
        let kb = kb();
        let rule = Rule::most_general(0, 2)
            .apply(&SpecOp::AddLiteral {
                relation: 0,
                arity: 2,
                position: 1,
                link: Link::Slot(ArgLoc::new(0, 0)),
            })
            .unwrap();
        let left = Fragment::single(0, 0..4);
        let right = Fragment::single(1, 0..4);
        let a = left.column(&rule, &kb, ArgLoc::new(0, 0)).unwrap();
        let b = right.column(&rule, &kb, ArgLoc::new(1, 1)).unwrap();
        let joined = left.join(a, &right, b);
        assert_eq!(joined.len(), 6);
        assert_eq!(joined.literals(), &[0, 1]);
        assert_eq!(joined.entry(0).len(), 2);
    }
}
