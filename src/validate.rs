//! Decompression and the soundness check.
//!
//! Decompression starts from the residual facts and applies every rule until
//! nothing new is derived, skipping the recorded counterexamples. Because
//! the residual holds a feedback vertex set of the fact dependency graph,
//! every compressed fact is reachable this way.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compress::CompressedKb;
use crate::error::{RelcompError, RelcompResult};
use crate::kb::KnowledgeBase;
use crate::rule::IndexedRule;
use crate::sampling::NegativeSampler;

/// Difference between an original KB and a decompressed one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Original facts the decompressed KB lacks.
    pub missing: usize,
    /// Decompressed facts the original KB lacks.
    pub extra: usize,
    /// Names of relations with any difference.
    pub mismatched: Vec<String>,
    /// Fixpoint rounds decompression needed.
    pub rounds: usize,
}

impl ValidationReport {
    /// Compares two KBs sharing a dictionary, relation by relation name.
    #[must_use]
    pub fn compare(original: &KnowledgeBase, restored: &KnowledgeBase) -> Self {
        let mut report = Self::default();
        for rel in original.relations() {
            let (missing, extra) = match restored.relation_by_name(rel.name()) {
                Some(other) if other.arity() == rel.arity() => (
                    rel.rows().filter(|r| !other.contains(r)).count(),
                    other.rows().filter(|r| !rel.contains(r)).count(),
                ),
                Some(other) => (rel.len(), other.len()),
                None => (rel.len(), 0),
            };
            if missing + extra > 0 {
                report.mismatched.push(rel.name().to_string());
            }
            report.missing += missing;
            report.extra += extra;
        }
        for rel in restored.relations() {
            if original.relation_by_name(rel.name()).is_none() && !rel.is_empty() {
                report.extra += rel.len();
                report.mismatched.push(rel.name().to_string());
            }
        }
        report
    }

    /// True if both KBs hold exactly the same facts.
    #[must_use]
    pub fn is_sound(&self) -> bool {
        self.missing == 0 && self.extra == 0
    }

    /// Turns an unsound report into [`RelcompError::ValidationFailed`].
    ///
    /// # Errors
    /// Returns the error if any fact is missing or extra.
    pub fn into_result(self) -> RelcompResult<Self> {
        if self.is_sound() {
            Ok(self)
        } else {
            Err(RelcompError::ValidationFailed {
                missing: self.missing,
                extra: self.extra,
            })
        }
    }
}

/// Re-derives the full KB from a compressed one; returns the KB and the
/// number of fixpoint rounds.
///
/// # Errors
/// Returns an error if a rule does not fit the residual KB.
pub fn decompress(compressed: &CompressedKb) -> RelcompResult<(KnowledgeBase, usize)> {
    let mut kb = compressed.residual().clone();
    let blocked: Vec<HashSet<&[u32]>> = kb
        .relations()
        .iter()
        .map(|rel| {
            compressed
                .counterexamples(rel.id())
                .chunks_exact(rel.arity().max(1))
                .collect()
        })
        .collect();

    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut added = 0;
        for rule in compressed.rules() {
            let head = rule.head().relation;
            let indexed = IndexedRule::build(rule, &kb, &NegativeSampler::closed_world())?;
            let rel = kb
                .relation(head)
                .ok_or_else(|| RelcompError::internal(format!("relation {head} does not exist")))?;
            let mut fresh: Vec<Vec<u32>> = Vec::new();
            indexed.entailment().for_each_entailed(|tuple| {
                if !rel.contains(tuple) && !blocked[head].contains(tuple) {
                    fresh.push(tuple.to_vec());
                }
                true
            });
            if fresh.is_empty() {
                continue;
            }
            if let Some(rel) = kb.relation_mut(head) {
                added += rel.add_records(fresh)?;
            }
        }
        debug!(round = rounds, added, "decompression round");
        if added == 0 {
            break;
        }
    }
    Ok((kb, rounds))
}

/// Decompresses `compressed` and compares the result with `original`.
///
/// # Errors
/// Returns an error if decompression fails; an unsound result is reported,
/// not returned as an error.
pub fn validate(original: &KnowledgeBase, compressed: &CompressedKb) -> RelcompResult<ValidationReport> {
    let (restored, rounds) = decompress(compressed)?;
    let mut report = ValidationReport::compare(original, &restored);
    report.rounds = rounds;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleParser;

    fn original() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("family");
        kb.add_records(
            "parent",
            &[vec!["a", "b"], vec!["b", "c"], vec!["c", "d"], vec!["d", "e"]],
        )
        .unwrap();
        kb.add_records("grandparent", &[vec!["a", "c"], vec!["b", "d"]])
            .unwrap();
        kb
    }

    fn residual(kb: &KnowledgeBase, keep_grand: &[Vec<u32>]) -> KnowledgeBase {
        KnowledgeBase::from_parts(
            "family_comp",
            kb.dictionary().clone(),
            vec![
                ("parent".to_string(), 2, kb.all_rows("parent").unwrap().to_vec()),
                ("grandparent".to_string(), 2, keep_grand.concat()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_compare_counts_differences() {
        let kb = original();
        let report = ValidationReport::compare(&kb, &residual(&kb, &[]));
        assert_eq!(report.missing, 2);
        assert_eq!(report.extra, 0);
        assert_eq!(report.mismatched, vec!["grandparent".to_string()]);
        assert!(!report.is_sound());
        assert!(matches!(
            report.into_result(),
            Err(RelcompError::ValidationFailed { missing: 2, extra: 0 })
        ));
    }

    #[test]
    fn test_decompress_with_counterexamples() {
        let kb = original();
        let rule = RuleParser::new()
            .unwrap()
            .parse("grandparent(X,Z):-parent(X,Y),parent(Y,Z)", &kb)
            .unwrap();
        let c = kb.dictionary().id("c").unwrap();
        let e = kb.dictionary().id("e").unwrap();
        let compressed = CompressedKb::new(residual(&kb, &[]), vec![rule.clone()], vec![Vec::new(), vec![c, e]]).unwrap();
        let report = validate(&kb, &compressed).unwrap();
        assert!(report.is_sound(), "{report:?}");
        assert_eq!(report.rounds, 2);

        // Without the counterexample, (c, e) comes back as an extra fact.
        let leaky = CompressedKb::new(residual(&kb, &[]), vec![rule], vec![Vec::new(), Vec::new()]).unwrap();
        let report = validate(&kb, &leaky).unwrap();
        assert_eq!(report.extra, 1);
        assert_eq!(report.missing, 0);
    }
}
