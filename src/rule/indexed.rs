//! Rule lifecycle: unindexed rules carry a structure whose counts are not
//! known yet; indexed rules own a refreshed cache and an evaluation.
//!
//! Only [`IndexedRule`] exposes counts, and only [`UnindexedRule::refresh`]
//! produces one, so reading the evaluation of a rule whose cache is stale
//! does not compile.

use std::sync::Arc;

use crate::cache::{Entailment, EvalCache};
use crate::error::{RelcompError, RelcompResult, RuleError};
use crate::eval::Eval;
use crate::kb::{KnowledgeBase, Relation};
use crate::sampling::NegativeSampler;

use super::fingerprint::Fingerprint;
use super::model::{Rule, SpecOp};

/// Where an unindexed rule came from.
#[derive(Debug, Clone)]
enum Origin {
    Root,
    Derived {
        parent: Rule,
        cache: Arc<EvalCache>,
        op: SpecOp,
    },
}

/// A rule whose structure just changed.
#[derive(Debug, Clone)]
pub struct UnindexedRule {
    rule: Rule,
    origin: Origin,
}

impl UnindexedRule {
    /// Rule structure.
    #[must_use]
    pub const fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Operator that produced this rule, if it has a parent.
    #[must_use]
    pub fn op(&self) -> Option<&SpecOp> {
        match &self.origin {
            Origin::Root => None,
            Origin::Derived { op, .. } => Some(op),
        }
    }

    /// Fingerprint of the structure.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.rule)
    }

    /// Builds the cache and evaluates the rule.
    ///
    /// # Errors
    /// Returns an internal error if the cache cannot be derived.
    pub fn refresh(self, kb: &KnowledgeBase, sampler: &NegativeSampler) -> RelcompResult<IndexedRule> {
        let cache = match self.origin {
            Origin::Root => {
                let head = kb
                    .relation(self.rule.head().relation)
                    .ok_or_else(|| RelcompError::internal("head relation does not exist"))?;
                EvalCache::root(head)
            }
            Origin::Derived { parent, cache, op } => cache.derive(&parent, &self.rule, &op, kb)?,
        };
        IndexedRule::evaluate(self.rule, Arc::new(cache), kb, sampler)
    }
}

/// A rule with a refreshed cache.
#[derive(Debug, Clone)]
pub struct IndexedRule {
    rule: Rule,
    cache: Arc<EvalCache>,
    entailment: Arc<Entailment>,
    eval: Eval,
    fingerprint: Fingerprint,
}

impl IndexedRule {
    fn evaluate(
        rule: Rule,
        cache: Arc<EvalCache>,
        kb: &KnowledgeBase,
        sampler: &NegativeSampler,
    ) -> RelcompResult<Self> {
        let entailment = cache.entailment(&rule, kb)?;
        let fingerprint = Fingerprint::of(&rule);
        let neg = sampler.negatives(&entailment);
        let eval = Eval::new(entailment.pos(), neg, rule.length());
        Ok(Self {
            rule,
            cache,
            entailment: Arc::new(entailment),
            eval,
            fingerprint,
        })
    }

    /// The indexed most general rule `h(?,..,?) :-`.
    ///
    /// # Errors
    /// Returns an internal error if evaluation fails.
    pub fn most_general(head: &Relation, kb: &KnowledgeBase, sampler: &NegativeSampler) -> RelcompResult<Self> {
        UnindexedRule {
            rule: Rule::most_general(head.id(), head.arity()),
            origin: Origin::Root,
        }
        .refresh(kb, sampler)
    }

    /// Indexes an arbitrary connected rule by replaying its construction.
    ///
    /// The resulting rule is equivalent to `rule` but may number variables
    /// and order body literals differently.
    ///
    /// # Errors
    /// Returns a rule error if `rule` cannot be constructed, or an internal
    /// error if it does not fit `kb`.
    pub fn build(rule: &Rule, kb: &KnowledgeBase, sampler: &NegativeSampler) -> RelcompResult<Self> {
        let head = rule.head();
        let head_rel = kb
            .relation(head.relation)
            .ok_or_else(|| RelcompError::internal(format!("relation {} does not exist", head.relation)))?;
        if head_rel.arity() != head.args.len() {
            return Err(RelcompError::internal(format!(
                "head of arity {} does not fit '{}'",
                head.args.len(),
                head_rel.name()
            )));
        }
        let mut current = Rule::most_general(head.relation, head.args.len());
        let mut cache = EvalCache::root(head_rel);
        for op in rule.construction()? {
            if let SpecOp::AddLiteral { relation, arity, .. } = op {
                let fits = kb.relation(relation).is_some_and(|r| r.arity() == arity);
                if !fits {
                    return Err(RelcompError::internal(format!("relation {relation} does not fit arity {arity}")));
                }
            }
            let next = current.step(&op)?;
            cache = cache.derive(&current, &next, &op, kb)?;
            current = next;
        }
        Self::evaluate(current, Arc::new(cache), kb, sampler)
    }

    /// Applies one operator, producing an unindexed child.
    ///
    /// # Errors
    /// Returns the rule error if the operator does not fit or the child is
    /// structurally invalid.
    pub fn specialize(&self, op: SpecOp) -> Result<UnindexedRule, RuleError> {
        let rule = self.rule.apply(&op)?;
        Ok(UnindexedRule {
            rule,
            origin: Origin::Derived {
                parent: self.rule.clone(),
                cache: Arc::clone(&self.cache),
                op,
            },
        })
    }

    /// Rule structure.
    #[must_use]
    pub const fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Evaluation record.
    #[must_use]
    pub const fn eval(&self) -> &Eval {
        &self.eval
    }

    /// Fingerprint of the structure.
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Coverage and entailment space.
    #[must_use]
    pub fn entailment(&self) -> &Entailment {
        &self.entailment
    }

    /// Materialized groundings.
    #[must_use]
    pub fn cache(&self) -> &EvalCache {
        &self.cache
    }

    /// Closed-world counterexamples: entailed head tuples missing from the
    /// head relation, in lexicographic order. `None` once more than `limit`
    /// are found.
    #[must_use]
    pub fn counterexamples(&self, kb: &KnowledgeBase, limit: usize) -> Option<Vec<Vec<u32>>> {
        let head = kb.relation(self.rule.head().relation)?;
        let mut out = Vec::new();
        let mut overflow = false;
        self.entailment.for_each_entailed(|tuple| {
            if !head.contains(tuple) {
                if out.len() == limit {
                    overflow = true;
                    return false;
                }
                out.push(tuple.to_vec());
            }
            true
        });
        if overflow {
            return None;
        }
        out.sort_unstable();
        Some(out)
    }
}
