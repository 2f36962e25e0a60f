//! Rule search: per-relation mining loop and acceptance.
//!
//! Each round runs a [`BeamSearch`] against a shared borrow of the KB; the
//! round's scoped workers have all joined before the winner's entailments
//! are marked through an exclusive borrow.

mod beam;
mod estimate;
mod expand;
mod pool;
mod tabu;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MinerConfig;
use crate::error::{RelcompError, RelcompResult};
use crate::eval::Eval;
use crate::kb::KnowledgeBase;
use crate::rule::{IndexedRule, Rule};
use crate::sampling::{NegativeKb, NegativeSampler};

pub use beam::{BeamSearch, Ranked};
pub use estimate::estimate;
pub use expand::{candidate_ops, PromisingConstants};
pub use pool::ScoringPool;
pub use tabu::TabuSet;

/// Body facts justifying one entailed head row: `(head row, [(relation, row)])`.
pub type Evidence = (u32, Vec<(usize, u32)>);

/// A rule accepted into the compressed KB, with everything the output and
/// the dependency analysis need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedRule {
    /// Head relation id.
    pub relation: usize,
    /// Rule structure.
    pub rule: Rule,
    /// Rendered rule.
    pub text: String,
    /// Evaluation at acceptance time.
    pub eval: Eval,
    /// Head rows this rule marked entailed, sorted.
    pub entailed: Vec<u32>,
    /// One justification per entailed row.
    #[serde(skip)]
    pub evidence: Vec<Evidence>,
    /// Closed-world counterexamples, sorted.
    pub counterexamples: Vec<Vec<u32>>,
}

impl AcceptedRule {
    /// Collects output data for `rule`, which entails the head rows `rows`.
    ///
    /// Returns `Ok(None)` if the rule has more than `max_counterexamples`
    /// counterexamples.
    ///
    /// # Errors
    /// Returns an internal error if the rule's cache is inconsistent.
    pub fn collect(
        kb: &KnowledgeBase,
        rule: &IndexedRule,
        rows: Vec<u32>,
        max_counterexamples: usize,
    ) -> RelcompResult<Option<Self>> {
        let Some(counterexamples) = rule.counterexamples(kb, max_counterexamples) else {
            return Ok(None);
        };
        let evidence = rule.cache().evidence(rule.rule(), &rows)?;
        Ok(Some(Self {
            relation: rule.rule().head().relation,
            rule: rule.rule().clone(),
            text: rule.rule().display(kb).to_string(),
            eval: *rule.eval(),
            entailed: rows,
            evidence,
            counterexamples,
        }))
    }
}

/// Mines rules for head relation `head` until no useful rule remains, every
/// row is covered, or the relation's cumulative compression rate would fall
/// below the stopping rate. Accepted rules' entailments are marked in `kb`.
///
/// # Errors
/// Returns an internal error if the relation does not exist or a cache
/// cannot be derived.
#[allow(clippy::cast_precision_loss)]
pub fn mine_relation(
    kb: &mut KnowledgeBase,
    head: usize,
    config: &MinerConfig,
    negatives: Option<&NegativeKb>,
) -> RelcompResult<Vec<AcceptedRule>> {
    let missing = || RelcompError::internal(format!("relation {head} does not exist"));
    let mode = config.sampling_mode(negatives.is_some());
    let constants = PromisingConstants::collect(kb, config.min_constant_coverage);
    let sampler = {
        let rel = kb.relation(head).ok_or_else(missing)?;
        NegativeSampler::for_relation(
            mode,
            config.negative_strategy,
            kb,
            rel,
            negatives,
            config.weighted,
            config.seed,
        )
    };

    let mut accepted = Vec::new();
    let mut tabu = TabuSet::default();
    let (mut pos_total, mut cost_total) = (0.0_f64, 0.0_f64);
    loop {
        let rel = kb.relation(head).ok_or_else(missing)?;
        if rel.is_empty() || rel.entailed_count() == rel.len() {
            debug!(relation = rel.name(), "all rows covered");
            break;
        }
        let name = rel.name().to_string();

        let Some(found) = BeamSearch::new(kb, head, config, &sampler, &constants)?.find_rule(&mut tabu)? else {
            debug!(relation = %name, pruned = tabu.len(), "no useful rule left");
            break;
        };

        let eval = *found.eval();
        let pos = eval.pos() as f64;
        let cost = pos + eval.neg() + eval.length() as f64;
        if (pos_total + pos) / (cost_total + cost) < config.stop_compression_rate {
            info!(
                relation = %name,
                rule = %found.rule().display(kb),
                eval = %eval,
                "rule rejected: compression rate would drop below the stopping rate"
            );
            break;
        }

        let rows = found.entailment().new_rows().to_vec();
        let Some(rule) = AcceptedRule::collect(kb, &found, rows, config.max_counterexamples)? else {
            warn!(
                relation = %name,
                rule = %found.rule().display(kb),
                limit = config.max_counterexamples,
                "rule rejected: too many counterexamples"
            );
            break;
        };

        kb.mark_entailed(head, rule.entailed.iter().map(|&r| r as usize));
        pos_total += pos;
        cost_total += cost;
        info!(relation = %name, rule = %rule.text, eval = %rule.eval, "rule accepted");
        accepted.push(rule);
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("family");
        let mut parent = Vec::new();
        let mut grand = Vec::new();
        for c in 0..10 {
            for i in 0..6 {
                parent.push(vec![format!("p{c}_{i}"), format!("p{c}_{}", i + 1)]);
                if i < 5 {
                    grand.push(vec![format!("p{c}_{i}"), format!("p{c}_{}", i + 2)]);
                }
            }
        }
        for i in 0..4 {
            grand.push(vec![format!("lone{i}"), format!("other{i}")]);
        }
        kb.add_records("parent", &parent).unwrap();
        kb.add_records("grandparent", &grand).unwrap();
        kb
    }

    #[test]
    fn test_mine_relation_marks_entailed() {
        let mut kb = family();
        let gp = kb.relation_id("grandparent").unwrap();
        let config = MinerConfig::default();
        let rules = mine_relation(&mut kb, gp, &config, None).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.entailed.len(), 50);
        assert_eq!(rule.evidence.len(), 50);
        assert!(rule.counterexamples.is_empty());
        let rel = kb.relation(gp).unwrap();
        assert_eq!(rel.entailed_count(), 50);
        assert_eq!(rel.residual_rows().len(), 4);
    }

    #[test]
    fn test_counterexample_limit_rejects_rule() {
        let mut kb = family();
        // One composition that is not a grandparent fact.
        kb.add_records("parent", &[vec!["p0_6", "extra"]]).unwrap();
        let gp = kb.relation_id("grandparent").unwrap();
        let config = MinerConfig::builder().max_counterexamples(0).build().unwrap();
        let rules = mine_relation(&mut kb, gp, &config, None).unwrap();
        assert!(rules.is_empty());
        assert_eq!(kb.relation(gp).unwrap().entailed_count(), 0);
    }
}
