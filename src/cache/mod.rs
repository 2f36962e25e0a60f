//! Incremental evaluation cache.
//!
//! Each indexed rule owns an [`EvalCache`]:
//! - the *positive* fragment holds every grounding of the whole rule in which
//!   the head is bound to a row of the head relation;
//! - the *body* fragments hold the groundings of the body alone, one fragment
//!   per connected component once the head is removed.
//!
//! A specialization derives the child cache from the parent cache by
//! filtering, extending or joining the affected fragments only; unaffected
//! fragments are shared. [`EvalCache::entailment`] turns a cache into the
//! counts the metrics need.

mod fragment;

use std::sync::Arc;


use crate::error::{RelcompError, RelcompResult};
use crate::kb::{KnowledgeBase, Relation};
use crate::rule::{ArgLoc, Argument, Link, Rule, SpecOp, VarId, HEAD};

pub use fragment::Fragment;

/// Materialized groundings of one rule.
#[derive(Debug, Clone)]
pub struct EvalCache {
    pos: Arc<Fragment>,
    body: Vec<Arc<Fragment>>,
}

fn relation<'a>(kb: &'a KnowledgeBase, id: usize) -> RelcompResult<&'a Relation> {
    kb.relation(id)
        .ok_or_else(|| RelcompError::internal(format!("relation {id} does not exist")))
}

fn first_body_loc(rule: &Rule, var: VarId) -> Option<ArgLoc> {
    rule.var_locations(var).into_iter().find(|l| l.literal != HEAD)
}

fn any_loc(rule: &Rule, var: VarId) -> RelcompResult<ArgLoc> {
    rule.var_locations(var)
        .into_iter()
        .next()
        .ok_or_else(|| RelcompError::internal(format!("variable X{var} has no occurrence")))
}

impl EvalCache {
    /// Cache of the most general rule `h(?,..,?) :-`.
    #[must_use]
    pub fn root(head: &Relation) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let rows = 0..head.len() as u32;
        Self {
            pos: Arc::new(Fragment::single(HEAD, rows)),
            body: Vec::new(),
        }
    }

    /// Positive fragment.
    #[must_use]
    pub fn positive(&self) -> &Fragment {
        &self.pos
    }

    /// Body fragments.
    pub fn body_fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.body.iter().map(AsRef::as_ref)
    }

    fn body_fragment_of(&self, literal: usize) -> RelcompResult<usize> {
        self.body
            .iter()
            .position(|f| f.covers(literal))
            .ok_or_else(|| RelcompError::internal(format!("literal {literal} is in no body fragment")))
    }

    /// Derives the cache of `child = parent.apply(op)`.
    ///
    /// # Errors
    /// Returns an internal error if the cache and rules are inconsistent.
    pub fn derive(&self, parent: &Rule, child: &Rule, op: &SpecOp, kb: &KnowledgeBase) -> RelcompResult<Self> {
        let mut body = self.body.clone();
        let pos = match *op {
            SpecOp::BindConstant { loc, constant } => {
                if loc.literal != HEAD {
                    let fi = self.body_fragment_of(loc.literal)?;
                    let frag = &self.body[fi];
                    body[fi] = Arc::new(frag.filter_const(frag.column(child, kb, loc)?, constant));
                }
                self.pos.filter_const(self.pos.column(child, kb, loc)?, constant)
            }
            SpecOp::UnifyVariables { target, with } => {
                let (other, body_other) = match with {
                    Link::Var(v) => (any_loc(parent, v)?, first_body_loc(parent, v)),
                    Link::Slot(s) => (s, (s.literal != HEAD).then_some(s)),
                };
                if let Some(b) = body_other.filter(|_| target.literal != HEAD) {
                    let ft = self.body_fragment_of(target.literal)?;
                    let fo = self.body_fragment_of(b.literal)?;
                    if ft == fo {
                        let frag = &self.body[ft];
                        body[ft] = Arc::new(frag.filter_eq(frag.column(child, kb, target)?, frag.column(child, kb, b)?));
                    } else {
                        let (left, right) = (&self.body[ft], &self.body[fo]);
                        let merged = left.join(left.column(child, kb, target)?, right, right.column(child, kb, b)?);
                        let (hi, lo) = if ft > fo { (ft, fo) } else { (fo, ft) };
                        body.remove(hi);
                        body.remove(lo);
                        body.push(Arc::new(merged));
                    }
                }
                self.pos.filter_eq(self.pos.column(child, kb, target)?, self.pos.column(child, kb, other)?)
            }
            SpecOp::AddLiteral {
                relation: rel_id,
                position,
                link,
                ..
            } => {
                let rel = relation(kb, rel_id)?;
                let new_literal = parent.literals().len();
                let (anchor, body_anchor) = match link {
                    Link::Var(v) => (any_loc(parent, v)?, first_body_loc(parent, v)),
                    Link::Slot(s) => (s, (s.literal != HEAD).then_some(s)),
                };
                match body_anchor {
                    Some(a) => {
                        let fi = self.body_fragment_of(a.literal)?;
                        let frag = &self.body[fi];
                        body[fi] = Arc::new(frag.extend(new_literal, rel, position, frag.column(child, kb, a)?));
                    }
                    None => {
                        #[allow(clippy::cast_possible_truncation)]
                        let rows = 0..rel.len() as u32;
                        body.push(Arc::new(Fragment::single(new_literal, rows)));
                    }
                }
                self.pos.extend(new_literal, rel, position, self.pos.column(child, kb, anchor)?)
            }
        };
        Ok(Self {
            pos: Arc::new(pos),
            body,
        })
    }

    /// Counts the not-yet-entailed head rows that would stay covered after
    /// applying `op` to `parent`, without deriving the child cache.
    ///
    /// # Errors
    /// Returns an internal error if the cache does not match `parent`.
    pub fn surviving_new_rows(&self, parent: &Rule, op: &SpecOp, kb: &KnowledgeBase) -> RelcompResult<usize> {
        let head_rel = relation(kb, parent.head().relation)?;
        let head_slot = self
            .pos
            .slot(HEAD)
            .ok_or_else(|| RelcompError::internal("positive fragment lost the head"))?;
        let mut rows: Vec<u32> = match *op {
            SpecOp::BindConstant { loc, constant } => {
                let col = self.pos.column(parent, kb, loc)?;
                self.pos
                    .entries()
                    .filter(|e| col.get(e) == constant)
                    .map(|e| e[head_slot])
                    .collect()
            }
            SpecOp::UnifyVariables { target, with } => {
                let other = match with {
                    Link::Var(v) => any_loc(parent, v)?,
                    Link::Slot(s) => s,
                };
                let a = self.pos.column(parent, kb, target)?;
                let b = self.pos.column(parent, kb, other)?;
                self.pos
                    .entries()
                    .filter(|e| a.get(e) == b.get(e))
                    .map(|e| e[head_slot])
                    .collect()
            }
            SpecOp::AddLiteral {
                relation: rel_id,
                position,
                link,
                ..
            } => {
                let rel = relation(kb, rel_id)?;
                let anchor = match link {
                    Link::Var(v) => any_loc(parent, v)?,
                    Link::Slot(s) => s,
                };
                let col = self.pos.column(parent, kb, anchor)?;
                self.pos
                    .entries()
                    .filter(|e| !rel.rows_with(position, col.get(e)).is_empty())
                    .map(|e| e[head_slot])
                    .collect()
            }
        };
        rows.sort_unstable();
        rows.dedup();
        Ok(rows.into_iter().filter(|&r| !head_rel.is_entailed(r as usize)).count())
    }

    /// Computes coverage and the closed-world entailment space of `rule`.
    ///
    /// # Errors
    /// Returns an internal error if the cache does not match `rule`.
    pub fn entailment(&self, rule: &Rule, kb: &KnowledgeBase) -> RelcompResult<Entailment> {
        let head_rel = relation(kb, rule.head().relation)?;
        let head_slot = self
            .pos
            .slot(HEAD)
            .ok_or_else(|| RelcompError::internal("positive fragment lost the head"))?;
        let mut covered: Vec<u32> = self.pos.entries().map(|e| e[head_slot]).collect();
        covered.sort_unstable();
        covered.dedup();
        let new_rows: Vec<u32> = covered
            .iter()
            .copied()
            .filter(|&r| !head_rel.is_entailed(r as usize))
            .collect();

        let head_args = &rule.head().args;
        let mut pattern: Vec<HeadArg> = Vec::with_capacity(head_args.len());
        let mut first_pos: Vec<(VarId, usize)> = Vec::new();
        let mut projections: Vec<Projection> = Vec::new();
        let mut proj_of_fragment: Vec<Option<usize>> = vec![None; self.body.len()];
        let mut satisfiable = true;

        for (position, arg) in head_args.iter().enumerate() {
            let slot = match *arg {
                Argument::Empty => HeadArg::Free,
                Argument::Constant(c) => HeadArg::Constant(c),
                Argument::Variable(v) => {
                    if let Some(&(_, p)) = first_pos.iter().find(|(var, _)| *var == v) {
                        HeadArg::Repeat(p)
                    } else {
                        first_pos.push((v, position));
                        match first_body_loc(rule, v) {
                            None => HeadArg::Free,
                            Some(loc) => {
                                let fi = self.body_fragment_of(loc.literal)?;
                                let proj = match proj_of_fragment[fi] {
                                    Some(p) => p,
                                    None => {
                                        projections.push(Projection::default());
                                        proj_of_fragment[fi] = Some(projections.len() - 1);
                                        projections.len() - 1
                                    }
                                };
                                projections[proj].locs.push(loc);
                                projections[proj].positions.push(position);
                                HeadArg::Projected(proj)
                            }
                        }
                    }
                }
            };
            pattern.push(slot);
        }

        for (fi, frag) in self.body.iter().enumerate() {
            match proj_of_fragment[fi] {
                None => satisfiable &= !frag.is_empty(),
                Some(p) => {
                    let columns = projections[p]
                        .locs
                        .iter()
                        .map(|&loc| frag.column(rule, kb, loc))
                        .collect::<RelcompResult<Vec<_>>>()?;
                    let mut tuples: Vec<Vec<u32>> = frag
                        .entries()
                        .map(|entry| columns.iter().map(|c| c.get(entry)).collect())
                        .collect();
                    tuples.sort_unstable();
                    tuples.dedup();
                    satisfiable &= !tuples.is_empty();
                    projections[p].tuples = tuples;
                }
            }
        }

        Ok(Entailment {
            arity: head_args.len(),
            covered,
            new_rows,
            pattern,
            projections,
            satisfiable,
            constants: kb.constant_count(),
        })
    }

    /// For each head row in `rows` (sorted), one body grounding proving it:
    /// `(head row, [(relation, row), ..])`.
    ///
    /// # Errors
    /// Returns an internal error if the cache does not match `rule`.
    pub fn evidence(&self, rule: &Rule, rows: &[u32]) -> RelcompResult<Vec<(u32, Vec<(usize, u32)>)>> {
        let head_slot = self
            .pos
            .slot(HEAD)
            .ok_or_else(|| RelcompError::internal("positive fragment lost the head"))?;
        let body_slots = (1..rule.literals().len())
            .map(|li| {
                self.pos
                    .slot(li)
                    .map(|s| (rule.literals()[li].relation, s))
                    .ok_or_else(|| RelcompError::internal(format!("literal {li} not in positive fragment")))
            })
            .collect::<RelcompResult<Vec<_>>>()?;

        let mut seen = vec![false; rows.len()];
        let mut out = Vec::with_capacity(rows.len());
        for entry in self.pos.entries() {
            let head_row = entry[head_slot];
            if let Ok(idx) = rows.binary_search(&head_row) {
                if !seen[idx] {
                    seen[idx] = true;
                    out.push((head_row, body_slots.iter().map(|&(rel, s)| (rel, entry[s])).collect()));
                }
            }
        }
        out.sort_unstable_by_key(|(row, _)| *row);
        Ok(out)
    }
}

/// How a head argument's value is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadArg {
    Constant(u32),
    /// Ranges over every constant.
    Free,
    /// Must equal the value at an earlier position.
    Repeat(usize),
    /// Bound by a body fragment; see [`Projection`].
    Projected(usize),
}

/// Distinct value combinations a body fragment allows for its head variables.
#[derive(Debug, Clone, Default)]
struct Projection {
    locs: Vec<ArgLoc>,
    positions: Vec<usize>,
    tuples: Vec<Vec<u32>>,
}

/// Coverage and entailment space of an indexed rule.
#[derive(Debug, Clone)]
pub struct Entailment {
    arity: usize,
    covered: Vec<u32>,
    new_rows: Vec<u32>,
    pattern: Vec<HeadArg>,
    projections: Vec<Projection>,
    satisfiable: bool,
    constants: u32,
}

impl Entailment {
    /// Head rows the rule entails and that are not yet entailed.
    #[must_use]
    pub fn new_rows(&self) -> &[u32] {
        &self.new_rows
    }

    /// Newly entailed positives.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.new_rows.len()
    }

    /// All head rows the rule entails, entailed already or not.
    #[must_use]
    pub fn covered_total(&self) -> usize {
        self.covered.len()
    }

    /// Head rows the rule entails (sorted).
    #[must_use]
    pub fn covered_rows(&self) -> &[u32] {
        &self.covered
    }

    /// Size of the set of head tuples the rule entails.
    #[must_use]
    pub fn all(&self) -> f64 {
        if !self.satisfiable {
            return 0.0;
        }
        let free = self.pattern.iter().filter(|a| **a == HeadArg::Free).count();
        #[allow(clippy::cast_precision_loss)]
        let product: f64 = self.projections.iter().map(|p| p.tuples.len() as f64).product();
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let free_space = f64::from(self.constants).powi(free as i32);
        product * free_space
    }

    /// Entailed head tuples outside the KB, under the closed-world assumption.
    #[must_use]
    pub fn cwa_negatives(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let covered = self.covered.len() as f64;
        (self.all() - covered).max(0.0)
    }

    /// True if the rule entails the head tuple `tuple`.
    #[must_use]
    pub fn entails(&self, tuple: &[u32]) -> bool {
        if !self.satisfiable || tuple.len() != self.arity {
            return false;
        }
        for (position, arg) in self.pattern.iter().enumerate() {
            let value = tuple[position];
            let ok = match *arg {
                HeadArg::Constant(c) => value == c,
                HeadArg::Free | HeadArg::Projected(_) => value >= 1 && value <= self.constants,
                HeadArg::Repeat(p) => value == tuple[p],
            };
            if !ok {
                return false;
            }
        }
        let mut key = Vec::new();
        self.projections.iter().all(|proj| {
            key.clear();
            key.extend(proj.positions.iter().map(|&p| tuple[p]));
            proj.tuples.binary_search(&key).is_ok()
        })
    }

    /// Visits every entailed head tuple in lexicographic order of
    /// projections and free values; stops early when `visit` returns false.
    pub fn for_each_entailed(&self, mut visit: impl FnMut(&[u32]) -> bool) {
        if !self.satisfiable {
            return;
        }
        let mut tuple = vec![0u32; self.arity];
        let free: Vec<usize> = (0..self.arity).filter(|&p| self.pattern[p] == HeadArg::Free).collect();
        self.fill_projection(0, &free, &mut tuple, &mut visit);
    }

    fn fill_projection(
        &self,
        proj: usize,
        free: &[usize],
        tuple: &mut [u32],
        visit: &mut impl FnMut(&[u32]) -> bool,
    ) -> bool {
        if proj == self.projections.len() {
            return self.fill_free(0, free, tuple, visit);
        }
        let p = &self.projections[proj];
        for values in &p.tuples {
            for (&position, &value) in p.positions.iter().zip(values) {
                tuple[position] = value;
            }
            if !self.fill_projection(proj + 1, free, tuple, visit) {
                return false;
            }
        }
        true
    }

    fn fill_free(
        &self,
        idx: usize,
        free: &[usize],
        tuple: &mut [u32],
        visit: &mut impl FnMut(&[u32]) -> bool,
    ) -> bool {
        if idx == free.len() {
            self.finish(tuple);
            return visit(tuple);
        }
        for value in 1..=self.constants {
            tuple[free[idx]] = value;
            if !self.fill_free(idx + 1, free, tuple, visit) {
                return false;
            }
        }
        true
    }

    fn finish(&self, tuple: &mut [u32]) {
        for (position, arg) in self.pattern.iter().enumerate() {
            match *arg {
                HeadArg::Constant(c) => tuple[position] = c,
                HeadArg::Repeat(p) => tuple[position] = tuple[p],
                HeadArg::Free | HeadArg::Projected(_) => {}
            }
        }
    }
}
