//! Rules pruned for insufficient fact coverage.
//!
//! Coverage counts only head facts not yet entailed. Specializing a rule
//! never raises it and neither do later rounds, so every rule a pruned rule
//! subsumes stays below the threshold for the rest of the relation's mining.

use std::collections::{HashMap, HashSet};

use crate::rule::{Fingerprint, Rule};

/// Pruned rules of one head relation, grouped by the relations in their body.
#[derive(Debug, Clone, Default)]
pub struct TabuSet {
    by_relations: HashMap<Vec<usize>, Vec<Rule>>,
    fingerprints: HashSet<Fingerprint>,
}

fn body_relations(rule: &Rule) -> Vec<usize> {
    let mut relations: Vec<usize> = rule.body().iter().map(|l| l.relation).collect();
    relations.sort_unstable();
    relations.dedup();
    relations
}

impl TabuSet {
    /// Records a rule that fell below the coverage threshold.
    pub fn insert(&mut self, rule: &Rule) {
        if self.fingerprints.insert(Fingerprint::of(rule)) {
            self.by_relations.entry(body_relations(rule)).or_default().push(rule.clone());
        }
    }

    /// True if some pruned rule subsumes `rule`.
    #[must_use]
    pub fn hit(&self, rule: &Rule) -> bool {
        if self.fingerprints.is_empty() {
            return false;
        }
        let relations = body_relations(rule);
        self.by_relations
            .iter()
            .filter(|(key, _)| key.iter().all(|r| relations.binary_search(r).is_ok()))
            .flat_map(|(_, rules)| rules)
            .any(|pruned| pruned.subsumes(rule))
    }

    /// Number of pruned rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    /// True if nothing was pruned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}
