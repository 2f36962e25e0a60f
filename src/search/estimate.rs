//! Cheap evaluation of a candidate before its cache is derived.
//!
//! The positive count is exact: it only checks the parent's positive
//! fragment. The entailment space is scaled from the parent's using column
//! statistics, and negatives follow that scaling.

use crate::config::SamplingMode;
use crate::error::RelcompResult;
use crate::eval::Eval;
use crate::kb::KnowledgeBase;
use crate::rule::{ArgLoc, Argument, IndexedRule, Link, Rule, SpecOp, HEAD};

fn first_location(rule: &Rule, link: Link) -> Option<ArgLoc> {
    match link {
        Link::Slot(s) => Some(s),
        Link::Var(v) => rule.var_locations(v).into_iter().next(),
    }
}

/// `(distinct values, rows)` of the column at `loc`.
#[allow(clippy::cast_precision_loss)]
fn column_stats(kb: &KnowledgeBase, rule: &Rule, loc: ArgLoc) -> (f64, f64) {
    rule.literals()
        .get(loc.literal)
        .and_then(|l| kb.relation(l.relation))
        .map_or((1.0, 1.0), |rel| {
            (rel.distinct(loc.position).max(1) as f64, rel.len().max(1) as f64)
        })
}

fn is_free_head_slot(rule: &Rule, loc: ArgLoc) -> bool {
    loc.literal == HEAD && rule.arg(loc) == Some(Argument::Empty)
}

/// Estimated size of the child's entailment space.
fn estimate_all(parent: &IndexedRule, op: &SpecOp, kb: &KnowledgeBase, retention: f64) -> f64 {
    let all = parent.entailment().all();
    let rule = parent.rule();
    let n = f64::from(kb.constant_count().max(1));
    match *op {
        SpecOp::BindConstant { loc, constant } => {
            if is_free_head_slot(rule, loc) {
                all / n
            } else {
                let freq = rule
                    .literals()
                    .get(loc.literal)
                    .and_then(|l| kb.relation(l.relation))
                    .map_or(0, |r| r.frequency(loc.position, constant));
                let (_, rows) = column_stats(kb, rule, loc);
                #[allow(clippy::cast_precision_loss)]
                let share = freq as f64 / rows;
                all * share
            }
        }
        SpecOp::UnifyVariables { target, with } => {
            let other = first_location(rule, with);
            let head_involved =
                is_free_head_slot(rule, target) || other.is_some_and(|o| is_free_head_slot(rule, o));
            if head_involved {
                all / n
            } else {
                let (dt, _) = column_stats(kb, rule, target);
                let (d_o, _) = other.map_or((1.0, 1.0), |o| column_stats(kb, rule, o));
                all / dt.max(d_o)
            }
        }
        SpecOp::AddLiteral {
            relation,
            position,
            link,
            ..
        } => {
            let anchor = first_location(rule, link);
            if anchor.is_some_and(|a| is_free_head_slot(rule, a)) {
                #[allow(clippy::cast_precision_loss)]
                let distinct = kb.relation(relation).map_or(0, |r| r.distinct(position)) as f64;
                all / n * distinct
            } else {
                all * retention
            }
        }
    }
}

/// Estimates the evaluation of `parent` specialized by `op`.
///
/// # Errors
/// Returns an internal error if the parent cache does not match its rule.
#[allow(clippy::cast_precision_loss)]
pub fn estimate(parent: &IndexedRule, op: &SpecOp, kb: &KnowledgeBase, mode: SamplingMode) -> RelcompResult<Eval> {
    let pos = parent.cache().surviving_new_rows(parent.rule(), op, kb)?;
    let parent_pos = parent.eval().pos();
    let retention = if parent_pos == 0 {
        1.0
    } else {
        pos as f64 / parent_pos as f64
    };
    let parent_all = parent.entailment().all();
    let all = estimate_all(parent, op, kb, retention).min(parent_all);
    let neg = match mode {
        SamplingMode::ClosedWorld => all - pos as f64,
        _ if parent_all > 0.0 => parent.eval().neg() * (all / parent_all),
        _ => 0.0,
    };
    Ok(Eval::new(pos, neg, parent.rule().length() + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::NegativeSampler;

    fn chains() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("chains");
        let mut parent = Vec::new();
        let mut grand = Vec::new();
        for c in 0..5 {
            for i in 0..6 {
                parent.push(vec![format!("n{c}_{i}"), format!("n{c}_{}", i + 1)]);
                if i < 5 {
                    grand.push(vec![format!("n{c}_{i}"), format!("n{c}_{}", i + 2)]);
                }
            }
        }
        kb.add_records("parent", &parent).unwrap();
        kb.add_records("grandparent", &grand).unwrap();
        kb
    }

    #[test]
    fn test_estimated_pos_is_exact() {
        let kb = chains();
        let gp = kb.relation_by_name("grandparent").unwrap();
        let p = kb.relation_id("parent").unwrap();
        let sampler = NegativeSampler::closed_world();
        let root = IndexedRule::most_general(gp, &kb, &sampler).unwrap();
        let op = SpecOp::AddLiteral {
            relation: p,
            arity: 2,
            position: 0,
            link: Link::Slot(ArgLoc::new(0, 0)),
        };
        let est = estimate(&root, &op, &kb, SamplingMode::ClosedWorld).unwrap();
        let exact = root.specialize(op).unwrap().refresh(&kb, &sampler).unwrap();
        assert_eq!(est.pos(), exact.eval().pos());
        assert_eq!(est.length(), 1);
        // Linking a free head column replaces the full domain by the
        // distinct values of parent's first column: exact here.
        assert!((est.neg() - exact.eval().neg()).abs() < 1e-6);
    }

    #[test]
    fn test_join_ranks_above_unrelated_link() {
        let kb = chains();
        let gp = kb.relation_by_name("grandparent").unwrap();
        let p = kb.relation_id("parent").unwrap();
        let sampler = NegativeSampler::closed_world();
        let root = IndexedRule::most_general(gp, &kb, &sampler).unwrap();
        // grandparent(X0,X1) :- parent(X0,?), parent(?,X1)
        let step = |rule: &IndexedRule, op| rule.specialize(op).unwrap().refresh(&kb, &sampler).unwrap();
        let r1 = step(
            &root,
            SpecOp::AddLiteral {
                relation: p,
                arity: 2,
                position: 0,
                link: Link::Slot(ArgLoc::new(0, 0)),
            },
        );
        let r2 = step(
            &r1,
            SpecOp::AddLiteral {
                relation: p,
                arity: 2,
                position: 1,
                link: Link::Slot(ArgLoc::new(0, 1)),
            },
        );
        let join = SpecOp::UnifyVariables {
            target: ArgLoc::new(1, 1),
            with: Link::Slot(ArgLoc::new(2, 0)),
        };
        let wrong = SpecOp::UnifyVariables {
            target: ArgLoc::new(1, 1),
            with: Link::Var(1),
        };
        let metric = crate::eval::EvalMetric::CompressionCapacity;
        let good = estimate(&r2, &join, &kb, SamplingMode::ClosedWorld).unwrap();
        let bad = estimate(&r2, &wrong, &kb, SamplingMode::ClosedWorld).unwrap();
        assert_eq!(good.pos(), 25);
        assert_eq!(bad.pos(), 0);
        assert!(good.score(metric) > bad.score(metric));
    }
}
