//! One mining round: beam search from the most general rule of a head
//! relation to a single winning rule.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;

use crate::config::MinerConfig;
use crate::error::{RelcompError, RelcompResult};
use crate::kb::{KnowledgeBase, Relation};
use crate::rule::{Fingerprint, IndexedRule, SpecOp, UnindexedRule};
use crate::sampling::NegativeSampler;

use super::estimate::estimate;
use super::expand::{candidate_ops, PromisingConstants};
use super::pool::ScoringPool;
use super::tabu::TabuSet;

/// A scored rule with its ranking key.
#[derive(Debug, Clone)]
pub struct Ranked {
    rule: IndexedRule,
    score: f64,
    text: String,
}

impl Ranked {
    fn new(rule: IndexedRule, miner: &BeamSearch<'_>) -> Self {
        let score = rule.eval().score(miner.config.eval_metric);
        let text = rule.rule().display(miner.kb).to_string();
        Self { rule, score, text }
    }

    /// The rule.
    #[must_use]
    pub const fn rule(&self) -> &IndexedRule {
        &self.rule
    }

    /// Score under the configured metric.
    #[must_use]
    pub const fn score(&self) -> f64 {
        self.score
    }

    /// Rendered rule text, the ranking tie-break.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consumes the entry, returning the rule.
    #[must_use]
    pub fn into_rule(self) -> IndexedRule {
        self.rule
    }

    /// Higher score first, then lexicographically smaller text.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.text.cmp(&other.text))
    }

    fn qualifies(&self) -> bool {
        self.rule.eval().is_useful() && self.rule.rule().is_range_restricted()
    }
}

/// A candidate waiting to be scored: which beam entry it extends, and how.
struct Pending {
    parent: usize,
    op: SpecOp,
    child: UnindexedRule,
}

/// Beam search for one head relation against the current KB state.
pub struct BeamSearch<'a> {
    kb: &'a KnowledgeBase,
    config: &'a MinerConfig,
    sampler: &'a NegativeSampler,
    constants: &'a PromisingConstants,
    head: &'a Relation,
    pool: ScoringPool,
}

impl<'a> BeamSearch<'a> {
    /// Creates a search over head relation `head`.
    ///
    /// # Errors
    /// Returns an internal error if the relation does not exist.
    pub fn new(
        kb: &'a KnowledgeBase,
        head: usize,
        config: &'a MinerConfig,
        sampler: &'a NegativeSampler,
        constants: &'a PromisingConstants,
    ) -> RelcompResult<Self> {
        let head = kb
            .relation(head)
            .ok_or_else(|| RelcompError::internal(format!("relation {head} does not exist")))?;
        Ok(Self {
            kb,
            config,
            sampler,
            constants,
            head,
            pool: ScoringPool::new("score", config.threads),
        })
    }

    /// Runs rounds of expand, score and prune until a rule is chosen.
    ///
    /// Candidates subsumed by a rule in `tabu` are skipped; candidates that
    /// fall below the coverage threshold are added to it.
    ///
    /// Returns `None` if no useful, range-restricted rule was found.
    ///
    /// # Errors
    /// Returns an internal error if a cache cannot be derived.
    pub fn find_rule(&self, tabu: &mut TabuSet) -> RelcompResult<Option<IndexedRule>> {
        let start = IndexedRule::most_general(self.head, self.kb, self.sampler)?;
        let mut visited: HashSet<Fingerprint> = HashSet::new();
        visited.insert(*start.fingerprint());
        let mut beams = vec![Ranked::new(start, self)];
        let mut best_local: Option<Ranked> = None;

        loop {
            let scored = self.round(&beams, &mut visited, tabu)?;

            let mut improved = vec![false; beams.len()];
            let mut candidates: Vec<Ranked> = Vec::with_capacity(scored.len());
            for (parent, child) in scored {
                if child.score <= beams[parent].score {
                    continue;
                }
                improved[parent] = true;
                candidates.push(child);
            }
            candidates.sort_by(Ranked::rank);
            candidates.truncate(self.config.beamwidth);

            for (beam, improved) in beams.into_iter().zip(improved) {
                if improved {
                    continue;
                }
                let better = best_local
                    .as_ref()
                    .map_or(true, |local| beam.rank(local) == Ordering::Less);
                if better {
                    best_local = Some(beam);
                }
            }

            let Some(best) = candidates.first() else {
                return Ok(best_local.filter(Ranked::qualifies).map(Ranked::into_rule));
            };

            if let Some(local) = best_local.take() {
                if local.rank(best) != Ordering::Greater {
                    if local.qualifies() {
                        debug!(rule = local.text(), "local optimum beats every candidate");
                        return Ok(Some(local.into_rule()));
                    }
                } else {
                    best_local = Some(local);
                }
            }

            let eval = best.rule.eval();
            if eval.rate() >= self.config.stop_compression_rate || eval.neg() == 0.0 {
                if let Some(winner) = candidates.iter().find(|c| c.qualifies()) {
                    return Ok(Some(winner.rule.clone()));
                }
            }

            for c in &candidates {
                debug!(rule = c.text(), eval = %c.rule.eval(), "beam extended");
            }
            beams = candidates;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn covers_enough(&self, candidate: &Ranked) -> bool {
        let rows = self.head.len().max(1) as f64;
        candidate.rule.eval().pos() as f64 / rows >= self.config.min_fact_coverage
    }

    /// One round: expand, score, then record what was scored exactly.
    /// Returns the scored candidates that cover enough facts.
    fn round(
        &self,
        beams: &[Ranked],
        visited: &mut HashSet<Fingerprint>,
        tabu: &mut TabuSet,
    ) -> RelcompResult<Vec<(usize, Ranked)>> {
        let pending = self.expand(beams, visited, tabu);
        let scored = self.score(beams, pending)?;
        let mut kept = Vec::with_capacity(scored.len());
        for (parent, child) in scored {
            visited.insert(*child.rule.fingerprint());
            if self.covers_enough(&child) {
                kept.push((parent, child));
            } else {
                tabu.insert(child.rule.rule());
            }
        }
        Ok(kept)
    }

    /// Candidates not yet scored exactly, deduplicated within the round.
    fn expand(&self, beams: &[Ranked], visited: &HashSet<Fingerprint>, tabu: &TabuSet) -> Vec<Pending> {
        let mut fresh: HashSet<Fingerprint> = HashSet::new();
        let mut pending = Vec::new();
        for (parent, beam) in beams.iter().enumerate() {
            let rule = beam.rule.rule();
            if rule.length() >= self.config.max_rule_length {
                continue;
            }
            for op in candidate_ops(rule, self.kb, self.constants) {
                // Operators that do not fit, or yield invalid structures, are
                // simply not candidates.
                let Ok(child) = beam.rule.specialize(op) else { continue };
                let fingerprint = child.fingerprint();
                if visited.contains(&fingerprint) || !fresh.insert(fingerprint) || tabu.hit(child.rule()) {
                    continue;
                }
                pending.push(Pending { parent, op, child });
            }
        }
        pending
    }

    /// Scores candidates, exactly or through estimation, returning
    /// `(parent index, scored child)` pairs.
    fn score(&self, beams: &[Ranked], pending: Vec<Pending>) -> RelcompResult<Vec<(usize, Ranked)>> {
        let pending = if self.config.estimation_enabled {
            self.observe(beams, pending)?
        } else {
            pending
        };
        let refreshed = self.pool.map(pending, |p| {
            p.child
                .refresh(self.kb, self.sampler)
                .map(|rule| (p.parent, Ranked::new(rule, self)))
        })?;
        refreshed.into_iter().collect()
    }

    /// Keeps the candidates whose estimated score is among the top
    /// `observations`, after dropping those below the coverage threshold.
    #[allow(clippy::cast_precision_loss)]
    fn observe(&self, beams: &[Ranked], pending: Vec<Pending>) -> RelcompResult<Vec<Pending>> {
        let mode = self.sampler.mode();
        let metric = self.config.eval_metric;
        let estimates = self.pool.map(pending, |p| {
            let parent = &beams[p.parent].rule;
            estimate(parent, &p.op, self.kb, mode).map(|eval| {
                let text = p.child.rule().display(self.kb).to_string();
                (eval, text, p)
            })
        })?;
        let rows = self.head.len().max(1) as f64;
        let mut estimates: Vec<_> = estimates
            .into_iter()
            .collect::<RelcompResult<Vec<_>>>()?
            .into_iter()
            .filter(|(eval, _, _)| eval.pos() as f64 / rows >= self.config.min_fact_coverage)
            .collect();
        estimates.sort_by(|(a, ta, _), (b, tb, _)| {
            b.score(metric)
                .total_cmp(&a.score(metric))
                .then_with(|| ta.cmp(tb))
        });
        estimates.truncate(self.config.observations());
        Ok(estimates.into_iter().map(|(_, _, p)| p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinerConfig;

    /// `chains` chains of `len` parent edges; grandparent holds every
    /// composition.
    fn chains(chains: usize, len: usize) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("chains");
        let mut parent = Vec::new();
        let mut grand = Vec::new();
        for c in 0..chains {
            for i in 0..len {
                parent.push(vec![format!("n{c}_{i}"), format!("n{c}_{}", i + 1)]);
                if i + 1 < len {
                    grand.push(vec![format!("n{c}_{i}"), format!("n{c}_{}", i + 2)]);
                }
            }
        }
        kb.add_records("parent", &parent).unwrap();
        kb.add_records("grandparent", &grand).unwrap();
        kb
    }

    fn find(kb: &KnowledgeBase, config: &MinerConfig) -> Option<IndexedRule> {
        let head = kb.relation_id("grandparent").unwrap();
        let sampler = NegativeSampler::closed_world();
        let constants = PromisingConstants::collect(kb, config.min_constant_coverage);
        BeamSearch::new(kb, head, config, &sampler, &constants)
            .unwrap()
            .find_rule(&mut TabuSet::default())
            .unwrap()
    }

    #[test]
    fn test_finds_grandparent_rule_exactly() {
        let kb = chains(8, 6);
        let config = MinerConfig::builder().observation_ratio(0.0).build().unwrap();
        let rule = find(&kb, &config).unwrap();
        assert_eq!(rule.eval().pos(), 40);
        assert!(rule.eval().neg().abs() < f64::EPSILON);
        assert_eq!(rule.eval().length(), 3);
        assert!(rule.rule().is_range_restricted());
    }

    #[test]
    fn test_finds_grandparent_rule_with_estimation() {
        let kb = chains(8, 6);
        let config = MinerConfig::default();
        let rule = find(&kb, &config).unwrap();
        assert_eq!(rule.eval().pos(), 40);
        assert_eq!(rule.eval().length(), 3);
    }

    #[test]
    fn test_thread_count_does_not_change_result() {
        let kb = chains(6, 5);
        let one = MinerConfig::builder().threads(1).build().unwrap();
        let four = MinerConfig::builder().threads(4).build().unwrap();
        let a = find(&kb, &one).map(|r| r.rule().display(&kb).to_string());
        let b = find(&kb, &four).map(|r| r.rule().display(&kb).to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_rule_when_nothing_compresses() {
        let mut kb = KnowledgeBase::new("noise");
        kb.add_records("r", &[vec!["a", "b"], vec!["c", "d"]]).unwrap();
        kb.add_records("s", &[vec!["e", "f"]]).unwrap();
        let head = kb.relation_id("r").unwrap();
        let config = MinerConfig::default();
        let sampler = NegativeSampler::closed_world();
        let constants = PromisingConstants::collect(&kb, config.min_constant_coverage);
        let found = BeamSearch::new(&kb, head, &config, &sampler, &constants)
            .unwrap()
            .find_rule(&mut TabuSet::default())
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_ranking_breaks_ties_by_text() {
        let kb = chains(2, 3);
        let head = kb.relation_by_name("grandparent").unwrap();
        let sampler = NegativeSampler::closed_world();
        let config = MinerConfig::default();
        let constants = PromisingConstants::collect(&kb, 0.25);
        let search = BeamSearch::new(&kb, head.id(), &config, &sampler, &constants).unwrap();
        let rule = IndexedRule::most_general(head, &kb, &sampler).unwrap();
        let a = Ranked::new(rule.clone(), &search);
        let mut b = Ranked::new(rule, &search);
        b.text = "zzz".to_string();
        assert_eq!(a.rank(&b), Ordering::Less);
        assert_eq!(b.rank(&a), Ordering::Greater);
    }

    #[test]
    fn test_only_exactly_scored_candidates_are_visited() {
        let kb = chains(8, 6);
        let head = kb.relation_by_name("grandparent").unwrap();
        let sampler = NegativeSampler::closed_world();
        let config = MinerConfig::builder()
            .beamwidth(1)
            .observation_ratio(1.0)
            .min_fact_coverage(0.0)
            .build()
            .unwrap();
        let constants = PromisingConstants::collect(&kb, config.min_constant_coverage);
        let search = BeamSearch::new(&kb, head.id(), &config, &sampler, &constants).unwrap();
        let root = Ranked::new(IndexedRule::most_general(head, &kb, &sampler).unwrap(), &search);
        let beams = vec![root];

        let mut visited = HashSet::new();
        let mut tabu = TabuSet::default();
        let offered = search.expand(&beams, &visited, &tabu).len();
        let scored = search.round(&beams, &mut visited, &mut tabu).unwrap();
        assert_eq!(scored.len(), config.observations());
        assert!(offered > scored.len());
        assert_eq!(visited.len(), scored.len());
        assert!(tabu.is_empty());

        // Candidates estimation passed over are offered again.
        assert_eq!(search.expand(&beams, &visited, &tabu).len(), offered - scored.len());
    }

    #[test]
    fn test_low_coverage_candidates_become_tabu() {
        let kb = chains(8, 6);
        let head = kb.relation_by_name("grandparent").unwrap();
        let sampler = NegativeSampler::closed_world();
        let config = MinerConfig::builder()
            .observation_ratio(0.0)
            .min_constant_coverage(0.0)
            .build()
            .unwrap();
        let constants = PromisingConstants::collect(&kb, config.min_constant_coverage);
        let search = BeamSearch::new(&kb, head.id(), &config, &sampler, &constants).unwrap();
        let root = Ranked::new(IndexedRule::most_general(head, &kb, &sampler).unwrap(), &search);
        let beams = vec![root];

        let mut visited = HashSet::new();
        let mut tabu = TabuSet::default();
        let offered = search.expand(&beams, &visited, &tabu).len();
        let kept = search.round(&beams, &mut visited, &mut tabu).unwrap();
        // Binding a head argument to one constant covers a single fact.
        assert!(!tabu.is_empty());
        assert_eq!(kept.len() + tabu.len(), offered);
        assert!(kept.iter().all(|(_, c)| search.covers_enough(c)));
    }
}
