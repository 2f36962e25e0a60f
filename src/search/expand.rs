//! Candidate generation: every specialization operator applicable to a rule.

use crate::kb::KnowledgeBase;
use crate::rule::{ArgLoc, Link, Rule, SpecOp, VarId};

/// Constants eligible for binding, indexed by `[relation][column]`.
#[derive(Debug, Clone, Default)]
pub struct PromisingConstants {
    per_relation: Vec<Vec<Vec<u32>>>,
}

impl PromisingConstants {
    /// Collects, for every relation column, the constants covering at least
    /// `min_constant_coverage` of its rows.
    #[must_use]
    pub fn collect(kb: &KnowledgeBase, min_constant_coverage: f64) -> Self {
        Self {
            per_relation: kb
                .relations()
                .iter()
                .map(|rel| rel.promising_constants(min_constant_coverage))
                .collect(),
        }
    }

    /// Promising constants of one column.
    #[must_use]
    pub fn of(&self, relation: usize, column: usize) -> &[u32] {
        self.per_relation
            .get(relation)
            .and_then(|cols| cols.get(column))
            .map_or(&[], Vec::as_slice)
    }
}

/// Every operator applicable to `rule`, in a fixed order:
/// 1. fill an empty slot with an existing variable;
/// 2. add a literal linked to an existing variable;
/// 3. join two empty slots into a new variable;
/// 4. add a literal linked to an empty slot;
/// 5. bind an empty slot to a promising constant.
///
/// Operators may still produce structurally invalid rules; those are
/// rejected when applied.
#[must_use]
pub fn candidate_ops(rule: &Rule, kb: &KnowledgeBase, constants: &PromisingConstants) -> Vec<SpecOp> {
    let slots = rule.empty_slots();
    let vars: Vec<VarId> = (0..rule.var_count()).collect();
    let relations: Vec<(usize, usize)> = kb
        .relations()
        .iter()
        .filter(|r| r.arity() > 0 && !r.is_empty())
        .map(|r| (r.id(), r.arity()))
        .collect();
    let mut ops = Vec::new();

    for &target in &slots {
        for &var in &vars {
            ops.push(SpecOp::UnifyVariables {
                target,
                with: Link::Var(var),
            });
        }
    }
    for &(relation, arity) in &relations {
        for position in 0..arity {
            for &var in &vars {
                ops.push(SpecOp::AddLiteral {
                    relation,
                    arity,
                    position,
                    link: Link::Var(var),
                });
            }
        }
    }
    for (i, &target) in slots.iter().enumerate() {
        for &other in &slots[i + 1..] {
            ops.push(SpecOp::UnifyVariables {
                target,
                with: Link::Slot(other),
            });
        }
    }
    for &(relation, arity) in &relations {
        for position in 0..arity {
            for &slot in &slots {
                ops.push(SpecOp::AddLiteral {
                    relation,
                    arity,
                    position,
                    link: Link::Slot(slot),
                });
            }
        }
    }
    for &loc in &slots {
        let ArgLoc { literal, position } = loc;
        let relation = rule.literals()[literal].relation;
        for &constant in constants.of(relation, position) {
            ops.push(SpecOp::BindConstant { loc, constant });
        }
    }
    ops
}
