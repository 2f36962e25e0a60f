//! The six rule shapes.
//!
//! | Template | Shape | Length |
//! |---|---|---|
//! | type inference | `h(X) :- p(.., X, ..)`, `arity(p) > 1` | 1 |
//! | reflexive | `h(X, X) :-` | 1 |
//! | subsumption | `h(X0..Xk) :- p(X0..Xk)` | k + 1 |
//! | dual | `h(X, Y) :- p(Y, X)` | 2 |
//! | transition | `h(X, Y) :- p(X, Z), q(Z, Y)` and `h(X, Y) :- p(Y, Z), q(Z, X)` | 3 |
//! | shared source/sink | `h(X, Y) :- p(Z, X), q(Z, Y)` and `h(X, Y) :- p(X, Z), q(Y, Z)` | 3 |

use std::collections::HashMap;

use super::{Candidate, ColumnOverlap, TemplateMiner};
use crate::kb::{KnowledgeBase, Relation};
use crate::rule::{Argument, Literal, Rule, VarId};

fn literal(relation: usize, vars: &[VarId]) -> Literal {
    Literal {
        relation,
        args: vars.iter().map(|&v| Argument::Variable(v)).collect(),
    }
}

/// Builds a rule from `(relation, variables)` literals, head first.
fn rule(literals: &[(usize, &[VarId])]) -> Option<Rule> {
    let rule = Rule::from_literals(literals.iter().map(|&(r, vars)| literal(r, vars)).collect()).ok()?;
    rule.check_structure().ok()?;
    Some(rule)
}

fn flatten_sorted(mut pairs: Vec<[u32; 2]>) -> Vec<u32> {
    pairs.sort_unstable();
    pairs.dedup();
    pairs.into_iter().flatten().collect()
}

/// `{(p[p_out], q[q_out]) | p[p_join] = q[q_join]}`, optionally transposed.
fn join(p: &Relation, p_join: usize, p_out: usize, q: &Relation, q_join: usize, q_out: usize, transpose: bool) -> Vec<u32> {
    let mut pairs = Vec::new();
    for prow in p.rows() {
        for &qrow in q.rows_with(q_join, prow[p_join]) {
            let pair = [prow[p_out], q.row(qrow as usize)[q_out]];
            pairs.push(if transpose { [pair[1], pair[0]] } else { pair });
        }
    }
    flatten_sorted(pairs)
}

fn binary(kb: &KnowledgeBase) -> impl Iterator<Item = &Relation> {
    kb.relations().iter().filter(|r| r.arity() == 2 && !r.is_empty())
}

fn is_binary(kb: &KnowledgeBase, id: usize) -> bool {
    kb.relation(id).is_some_and(|r| r.arity() == 2)
}

/// `h(X) :- p(.., X, ..)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeInferenceMiner;

impl TemplateMiner for TypeInferenceMiner {
    fn name(&self) -> &'static str {
        "TypeInference"
    }

    fn candidates(&self, kb: &KnowledgeBase, overlap: &ColumnOverlap) -> Vec<Candidate> {
        let mut out = Vec::new();
        for head in kb.relations().iter().filter(|r| r.arity() == 1 && !r.is_empty()) {
            for &(p, col) in overlap.similar(head.id(), 0) {
                let Some(body) = kb.relation(p).filter(|r| r.arity() > 1) else {
                    continue;
                };
                let mut vars: Vec<VarId> = (1..).take(body.arity()).collect();
                vars[col] = 0;
                let Some(rule) = rule(&[(head.id(), &[0]), (p, &vars)]) else {
                    continue;
                };
                out.push(Candidate {
                    head: head.id(),
                    rule,
                    entailments: body.column_values(col),
                });
            }
        }
        out
    }
}

/// `h(X, X) :-`. Not range-restricted: matches are reported, never applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReflexiveMiner;

impl TemplateMiner for ReflexiveMiner {
    fn name(&self) -> &'static str {
        "Reflexive"
    }

    fn candidates(&self, kb: &KnowledgeBase, _overlap: &ColumnOverlap) -> Vec<Candidate> {
        binary(kb)
            .filter_map(|head| {
                let entailments: Vec<u32> = head
                    .rows()
                    .filter(|row| row[0] == row[1])
                    .flatten()
                    .copied()
                    .collect();
                Some(Candidate {
                    head: head.id(),
                    rule: rule(&[(head.id(), &[0, 0])])?,
                    entailments,
                })
            })
            .collect()
    }
}

/// `h(X0..Xk) :- p(X0..Xk)`, `p != h`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubsumptionMiner;

impl TemplateMiner for SubsumptionMiner {
    fn name(&self) -> &'static str {
        "Subsumption"
    }

    fn candidates(&self, kb: &KnowledgeBase, overlap: &ColumnOverlap) -> Vec<Candidate> {
        let mut out = Vec::new();
        for head in kb.relations().iter().filter(|r| r.arity() > 0 && !r.is_empty()) {
            let h = head.id();
            let arity = head.arity();
            for &(p, col) in overlap.similar(h, 0) {
                if col != 0 || p == h {
                    continue;
                }
                let Some(body) = kb.relation(p).filter(|r| r.arity() == arity) else {
                    continue;
                };
                if !(1..arity).all(|c| overlap.is_similar((h, c), (p, c))) {
                    continue;
                }
                let vars: Vec<VarId> = (0..).take(arity).collect();
                let Some(rule) = rule(&[(h, &vars), (p, &vars)]) else {
                    continue;
                };
                out.push(Candidate {
                    head: h,
                    rule,
                    entailments: body.data().to_vec(),
                });
            }
        }
        out
    }
}

/// `h(X, Y) :- p(Y, X)`, `p != h`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DualMiner;

impl TemplateMiner for DualMiner {
    fn name(&self) -> &'static str {
        "Dual"
    }

    fn candidates(&self, kb: &KnowledgeBase, overlap: &ColumnOverlap) -> Vec<Candidate> {
        let mut swapped: HashMap<usize, Vec<u32>> = HashMap::new();
        let mut out = Vec::new();
        for head in binary(kb) {
            let h = head.id();
            for &(p, col) in overlap.similar(h, 0) {
                if col != 1 || p == h || !is_binary(kb, p) || !overlap.is_similar((h, 1), (p, 0)) {
                    continue;
                }
                let (Some(body), Some(rule)) = (kb.relation(p), rule(&[(h, &[0, 1]), (p, &[1, 0])])) else {
                    continue;
                };
                let entailments = swapped
                    .entry(p)
                    .or_insert_with(|| flatten_sorted(body.rows().map(|r| [r[1], r[0]]).collect()))
                    .clone();
                out.push(Candidate {
                    head: h,
                    rule,
                    entailments,
                });
            }
        }
        out
    }
}

/// Which body shape a two-literal template instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Chain {
    /// `h(X, Y) :- p(X, Z), q(Z, Y)`
    Forward,
    /// `h(X, Y) :- p(Y, Z), q(Z, X)`
    Backward,
    /// `h(X, Y) :- p(Z, X), q(Z, Y)`
    Source,
    /// `h(X, Y) :- p(X, Z), q(Y, Z)`
    Sink,
}

impl Chain {
    /// Variables of `p` and `q`, with `X = 0, Y = 1, Z = 2`.
    const fn body_vars(self) -> ([VarId; 2], [VarId; 2]) {
        match self {
            Self::Forward => ([0, 2], [2, 1]),
            Self::Backward => ([1, 2], [2, 0]),
            Self::Source => ([2, 0], [2, 1]),
            Self::Sink => ([0, 2], [1, 2]),
        }
    }

    /// Head columns fed by `(p column, q column)`: `(X source, Y source)`.
    const fn feeds(self) -> (ColumnPair, ColumnPair) {
        match self {
            // X from p col 0, Y from q col 1
            Self::Forward => ((0, 0), (1, 1)),
            // Y from p col 0, X from q col 1
            Self::Backward => ((1, 0), (0, 1)),
            Self::Source => ((0, 1), (1, 1)),
            Self::Sink => ((0, 0), (1, 0)),
        }
    }

    fn entailments(self, p: &Relation, q: &Relation) -> Vec<u32> {
        match self {
            Self::Forward => join(p, 1, 0, q, 0, 1, false),
            Self::Backward => join(p, 1, 0, q, 0, 1, true),
            Self::Source => join(p, 0, 1, q, 0, 1, false),
            Self::Sink => join(p, 1, 0, q, 1, 0, false),
        }
    }
}

/// `(head column, body column)`.
type ColumnPair = (usize, usize);

/// Instantiates every `(h, p, q)` for the given chain shapes.
fn chain_candidates(kb: &KnowledgeBase, overlap: &ColumnOverlap, shapes: &[Chain]) -> Vec<Candidate> {
    let mut joined: HashMap<(Chain, usize, usize), Vec<u32>> = HashMap::new();
    let mut out = Vec::new();
    for head in binary(kb) {
        let h = head.id();
        for &shape in shapes {
            let ((hp, pc), (hq, qc)) = shape.feeds();
            let ps: Vec<usize> = overlap
                .similar(h, hp)
                .iter()
                .filter(|&&(r, c)| c == pc && is_binary(kb, r))
                .map(|&(r, _)| r)
                .collect();
            let qs: Vec<usize> = overlap
                .similar(h, hq)
                .iter()
                .filter(|&&(r, c)| c == qc && is_binary(kb, r))
                .map(|&(r, _)| r)
                .collect();
            let (pv, qv) = shape.body_vars();
            for &p in &ps {
                for &q in &qs {
                    let (Some(prel), Some(qrel)) = (kb.relation(p), kb.relation(q)) else {
                        continue;
                    };
                    let Some(rule) = rule(&[(h, &[0, 1]), (p, &pv), (q, &qv)]) else {
                        continue;
                    };
                    let entailments = joined
                        .entry((shape, p, q))
                        .or_insert_with(|| shape.entailments(prel, qrel))
                        .clone();
                    if entailments.is_empty() {
                        continue;
                    }
                    out.push(Candidate {
                        head: h,
                        rule,
                        entailments,
                    });
                }
            }
        }
    }
    out
}

/// `h(X, Y) :- p(X, Z), q(Z, Y)` and `h(X, Y) :- p(Y, Z), q(Z, X)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransitionMiner;

impl TemplateMiner for TransitionMiner {
    fn name(&self) -> &'static str {
        "Transition"
    }

    fn candidates(&self, kb: &KnowledgeBase, overlap: &ColumnOverlap) -> Vec<Candidate> {
        chain_candidates(kb, overlap, &[Chain::Forward, Chain::Backward])
    }
}

/// `h(X, Y) :- p(Z, X), q(Z, Y)` and `h(X, Y) :- p(X, Z), q(Y, Z)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SharedSourceSinkMiner;

impl TemplateMiner for SharedSourceSinkMiner {
    fn name(&self) -> &'static str {
        "SharedSourceSink"
    }

    fn candidates(&self, kb: &KnowledgeBase, overlap: &ColumnOverlap) -> Vec<Candidate> {
        chain_candidates(kb, overlap, &[Chain::Source, Chain::Sink])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(kb: &KnowledgeBase, candidates: &[Candidate]) -> Vec<String> {
        let mut out: Vec<String> = candidates
            .iter()
            .map(|c| c.rule.display(kb).to_string())
            .collect();
        out.sort();
        out
    }

    fn family() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("family");
        let mut parent = Vec::new();
        let mut grand = Vec::new();
        let mut person = Vec::new();
        for c in 0..4 {
            for i in 0..4 {
                parent.push(vec![format!("n{c}_{i}"), format!("n{c}_{}", i + 1)]);
                person.push(vec![format!("n{c}_{i}")]);
                if i < 3 {
                    grand.push(vec![format!("n{c}_{i}"), format!("n{c}_{}", i + 2)]);
                }
            }
        }
        kb.add_records("parent", &parent).unwrap();
        kb.add_records("grandparent", &grand).unwrap();
        kb.add_records("person", &person).unwrap();
        kb
    }

    #[test]
    fn test_type_inference() {
        let kb = family();
        let overlap = ColumnOverlap::new(&kb, 0.2);
        let candidates = TypeInferenceMiner.candidates(&kb, &overlap);
        let found = names(&kb, &candidates);
        assert!(found.contains(&"person(X0):-parent(X0,?)".to_string()));
        let c = candidates
            .iter()
            .find(|c| c.rule.display(&kb).to_string() == "person(X0):-parent(X0,?)")
            .unwrap();
        assert_eq!(c.entailments.len(), 16);
        assert_eq!(c.rule.length(), 1);
    }

    #[test]
    fn test_transition_finds_composition() {
        let kb = family();
        let overlap = ColumnOverlap::new(&kb, 0.2);
        let candidates = TransitionMiner.candidates(&kb, &overlap);
        let gp = kb.relation_id("grandparent").unwrap();
        let p = kb.relation_id("parent").unwrap();
        let c = candidates
            .iter()
            .find(|c| {
                c.head == gp
                    && c.rule.body().iter().all(|l| l.relation == p)
                    && c.rule.display(&kb).to_string() == "grandparent(X0,X1):-parent(X0,X2),parent(X2,X1)"
            })
            .unwrap();
        // 4 chains of 4 edges: 3 compositions each.
        assert_eq!(c.entailments.len(), 12 * 2);
        assert_eq!(c.rule.length(), 3);
        let rel = kb.relation(gp).unwrap();
        assert_eq!(rel.intersect_sorted(&c.entailments).len(), 12);
    }

    #[test]
    fn test_dual_and_subsumption_skip_self() {
        let mut kb = KnowledgeBase::new("sym");
        let mut friend = Vec::new();
        for i in 0..10 {
            friend.push(vec![format!("a{i}"), format!("b{i}")]);
            friend.push(vec![format!("b{i}"), format!("a{i}")]);
        }
        kb.add_records("friend", &friend).unwrap();
        let overlap = ColumnOverlap::new(&kb, 0.2);
        assert!(DualMiner.candidates(&kb, &overlap).is_empty());
        assert!(SubsumptionMiner.candidates(&kb, &overlap).is_empty());
    }

    #[test]
    fn test_subsumption() {
        let mut kb = KnowledgeBase::new("sub");
        let rows: Vec<Vec<String>> = (0..10).map(|i| vec![format!("a{i}"), format!("b{i}")]).collect();
        kb.add_records("mother", &rows[..5]).unwrap();
        kb.add_records("parent", &rows).unwrap();
        let overlap = ColumnOverlap::new(&kb, 0.2);
        let found = names(&kb, &SubsumptionMiner.candidates(&kb, &overlap));
        assert_eq!(
            found,
            vec![
                "mother(X0,X1):-parent(X0,X1)".to_string(),
                "parent(X0,X1):-mother(X0,X1)".to_string()
            ]
        );
    }

    #[test]
    fn test_shared_source() {
        let mut kb = KnowledgeBase::new("sibling");
        let mut parent = Vec::new();
        let mut sibling = Vec::new();
        for i in 0..6 {
            parent.push(vec![format!("p{i}"), format!("a{i}")]);
            parent.push(vec![format!("p{i}"), format!("b{i}")]);
            sibling.push(vec![format!("a{i}"), format!("b{i}")]);
            sibling.push(vec![format!("b{i}"), format!("a{i}")]);
        }
        kb.add_records("parent", &parent).unwrap();
        kb.add_records("sibling", &sibling).unwrap();
        let overlap = ColumnOverlap::new(&kb, 0.2);
        let candidates = SharedSourceSinkMiner.candidates(&kb, &overlap);
        let c = candidates
            .iter()
            .find(|c| c.rule.display(&kb).to_string() == "sibling(X0,X1):-parent(X2,X0),parent(X2,X1)")
            .unwrap();
        // Every ordered pair of children of one parent, including (x, x).
        assert_eq!(c.entailments.len(), 6 * 4 * 2);
    }

    #[test]
    fn test_reflexive_rule_is_not_range_restricted() {
        let mut kb = KnowledgeBase::new("eq");
        kb.add_records("same", &[vec!["a", "a"], vec!["b", "b"], vec!["a", "b"]])
            .unwrap();
        let overlap = ColumnOverlap::new(&kb, 0.2);
        let candidates = ReflexiveMiner.candidates(&kb, &overlap);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].entailments.len(), 4);
        assert!(!candidates[0].rule.is_range_restricted());
    }
}
