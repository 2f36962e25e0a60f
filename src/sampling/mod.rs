//! Negative evidence for candidate rules.
//!
//! The sampler for a head relation is built once before that relation is
//! mined and owns everything it needs, so it can be shared read-only with
//! the scoring workers while the KB itself stays borrowable between rounds.

mod weights;

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::cache::Entailment;
use crate::config::{NegativeStrategy, SamplingMode};
use crate::kb::{KnowledgeBase, Relation};

pub use weights::{interval_bounds, interval_weights};

/// Rejection attempts per requested sample when drawing from the complement.
const DRAW_ATTEMPTS_PER_SAMPLE: usize = 8;

/// Negative tuples with optional per-tuple weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NegativeSampleSet {
    arity: usize,
    tuples: Vec<u32>,
    weights: Option<Vec<f64>>,
}

impl NegativeSampleSet {
    /// Creates an unweighted set from row-major tuples (sorted and
    /// deduplicated here).
    #[must_use]
    pub fn new(arity: usize, tuples: Vec<u32>) -> Self {
        let mut rows: Vec<&[u32]> = if arity == 0 {
            Vec::new()
        } else {
            tuples.chunks_exact(arity).collect()
        };
        rows.sort_unstable();
        rows.dedup();
        let tuples = rows.into_iter().flatten().copied().collect();
        Self {
            arity,
            tuples,
            weights: None,
        }
    }

    /// Attaches interval weights computed against `positives`.
    #[must_use]
    pub fn weighted(mut self, positives: &Relation, constants: u32) -> Self {
        self.weights = Some(interval_weights(positives, &self.tuples, constants));
        self
    }

    /// Number of tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.arity == 0 {
            0
        } else {
            self.tuples.len() / self.arity
        }
    }

    /// True if there are no tuples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Tuples in lexicographic order.
    pub fn tuples(&self) -> impl Iterator<Item = &[u32]> + '_ {
        self.tuples.chunks_exact(self.arity.max(1))
    }

    /// Weights, if the set is weighted.
    #[must_use]
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    /// Count (or weight sum) of the tuples `ent` entails.
    #[must_use]
    pub fn entailed_by(&self, ent: &Entailment) -> f64 {
        let mut total = 0.0;
        for (idx, tuple) in self.tuples().enumerate() {
            if ent.entails(tuple) {
                total += self.weights.as_ref().map_or(1.0, |w| w[idx]);
            }
        }
        total
    }

    /// Sum of the `budget` largest weights (or counts) among the tuples
    /// `ent` entails.
    #[must_use]
    pub fn hardest_entailed_by(&self, ent: &Entailment, budget: usize) -> f64 {
        let mut hit: Vec<f64> = self
            .tuples()
            .enumerate()
            .filter(|(_, tuple)| ent.entails(tuple))
            .map(|(idx, _)| self.weights.as_ref().map_or(1.0, |w| w[idx]))
            .collect();
        if hit.len() > budget {
            hit.sort_by(|a, b| b.total_cmp(a));
            hit.truncate(budget);
        }
        hit.iter().sum()
    }

    /// Up to `budget` tuples chosen uniformly without replacement; weights
    /// are dropped.
    #[must_use]
    pub fn subsample(&self, budget: usize, rng: &mut StdRng) -> Self {
        let len = self.len();
        if len <= budget {
            return Self::new(self.arity, self.tuples.clone());
        }
        let mut picked = rand::seq::index::sample(rng, len, budget).into_vec();
        picked.sort_unstable();
        let mut tuples = Vec::with_capacity(budget * self.arity);
        for idx in picked {
            tuples.extend_from_slice(&self.tuples[idx * self.arity..(idx + 1) * self.arity]);
        }
        Self::new(self.arity, tuples)
    }
}

/// Negative KB tuples re-expressed in the positive KB's ids.
#[derive(Debug, Clone, Default)]
pub struct NegativeKb {
    per_relation: Vec<NegativeSampleSet>,
}

impl NegativeKb {
    /// Maps relations by name and constants by symbol from `negative` onto
    /// `positive`. Tuples mentioning a constant unknown to `positive` cannot
    /// be entailed and are dropped.
    #[must_use]
    pub fn remap(negative: &KnowledgeBase, positive: &KnowledgeBase) -> Self {
        let mut per_relation = Vec::with_capacity(positive.relations().len());
        for rel in positive.relations() {
            let mut tuples = Vec::new();
            let mut dropped = 0usize;
            if let Some(neg_rel) = negative.relation_by_name(rel.name()) {
                if neg_rel.arity() == rel.arity() {
                    for row in neg_rel.rows() {
                        let mapped: Option<Vec<u32>> = row
                            .iter()
                            .map(|&c| {
                                negative
                                    .dictionary()
                                    .name(c)
                                    .and_then(|name| positive.dictionary().id(name))
                            })
                            .collect();
                        match mapped {
                            Some(values) => tuples.extend(values),
                            None => dropped += 1,
                        }
                    }
                } else {
                    warn!(
                        relation = rel.name(),
                        expected = rel.arity(),
                        actual = neg_rel.arity(),
                        "negative relation arity differs; ignoring it"
                    );
                }
            }
            if dropped > 0 {
                warn!(relation = rel.name(), dropped, "dropped negative tuples with unknown constants");
            }
            per_relation.push(NegativeSampleSet::new(rel.arity(), tuples));
        }
        Self { per_relation }
    }

    /// Negatives of relation `id`.
    #[must_use]
    pub fn relation(&self, id: usize) -> Option<&NegativeSampleSet> {
        self.per_relation.get(id)
    }
}

/// Counter-evidence provider for one head relation.
#[derive(Debug, Clone)]
pub struct NegativeSampler {
    mode: SamplingMode,
    budget: usize,
    samples: Option<NegativeSampleSet>,
}

impl NegativeSampler {
    /// Builds the sampler for head relation `head`.
    ///
    /// A supplied negative KB is the pool for every mode but closed world:
    /// exact mode takes all of its tuples, budgeted mode draws from it, and
    /// adversarial mode picks the hardest among them. Without one, budgeted
    /// mode generates its samples with `strategy` and adversarial mode works
    /// on the closed-world negatives. Weights apply to any fixed set.
    #[must_use]
    pub fn for_relation(
        mode: SamplingMode,
        strategy: NegativeStrategy,
        kb: &KnowledgeBase,
        head: &Relation,
        negatives: Option<&NegativeKb>,
        weighted: bool,
        seed: u64,
    ) -> Self {
        let budget = mode.budget(head.len());
        let constants = kb.constant_count();
        let supplied = negatives.map(|n| {
            n.relation(head.id())
                .cloned()
                .unwrap_or_else(|| NegativeSampleSet::new(head.arity(), Vec::new()))
        });
        let samples = match mode {
            SamplingMode::ClosedWorld => None,
            SamplingMode::ExactKb => {
                Some(supplied.unwrap_or_else(|| NegativeSampleSet::new(head.arity(), Vec::new())))
            }
            SamplingMode::Budgeted { .. } => {
                let mut rng = StdRng::seed_from_u64(relation_seed(seed, head.id()));
                Some(match supplied {
                    Some(pool) => pool.subsample(budget, &mut rng),
                    None => generate(strategy, head, constants, budget, &mut rng),
                })
            }
            SamplingMode::Adversarial { .. } => supplied,
        };
        let samples = samples.map(|set| {
            if weighted {
                set.weighted(head, constants)
            } else {
                set
            }
        });
        if let Some(set) = &samples {
            debug!(
                relation = head.name(),
                samples = set.len(),
                weighted,
                strategy = %strategy,
                "negative samples ready"
            );
        }
        Self { mode, budget, samples }
    }

    /// Exact closed-world counting.
    #[must_use]
    pub const fn closed_world() -> Self {
        Self {
            mode: SamplingMode::ClosedWorld,
            budget: 0,
            samples: None,
        }
    }

    /// Sampling mode.
    #[must_use]
    pub const fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// Pre-drawn or supplied negatives, if the mode uses a fixed set.
    #[must_use]
    pub fn samples(&self) -> Option<&NegativeSampleSet> {
        self.samples.as_ref()
    }

    /// Negative evidence for a rule with entailment `ent`.
    #[must_use]
    pub fn negatives(&self, ent: &Entailment) -> f64 {
        match self.mode {
            SamplingMode::ClosedWorld => ent.cwa_negatives(),
            SamplingMode::ExactKb | SamplingMode::Budgeted { .. } => {
                self.samples.as_ref().map_or(0.0, |s| s.entailed_by(ent))
            }
            SamplingMode::Adversarial { .. } => self.adversarial(ent),
        }
    }

    /// The `budget` negatives that lower the rule's score the most, among
    /// those it entails. Closed-world negatives are interchangeable, so
    /// that is `min(cwa, budget)`; in a weighted pool it is the heaviest
    /// entailed tuples.
    #[allow(clippy::cast_precision_loss)]
    fn adversarial(&self, ent: &Entailment) -> f64 {
        match &self.samples {
            Some(pool) => pool.hardest_entailed_by(ent, self.budget),
            None => ent.cwa_negatives().min(self.budget as f64),
        }
    }
}

fn relation_seed(seed: u64, relation: usize) -> u64 {
    seed ^ (relation as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Up to `budget` negatives of `head` produced by `strategy`.
fn generate(
    strategy: NegativeStrategy,
    head: &Relation,
    constants: u32,
    budget: usize,
    rng: &mut StdRng,
) -> NegativeSampleSet {
    match strategy {
        NegativeStrategy::Uniform => draw_uniform(head, constants, budget, rng),
        NegativeStrategy::PositiveRelative => draw_pos_relative(head, constants, budget, rng),
        NegativeStrategy::NegativeInterval => {
            NegativeSampleSet::new(head.arity(), interval_bounds(head, constants)).subsample(budget, rng)
        }
    }
}

/// Up to `budget` distinct negatives, each a random positive row of `head`
/// with one random argument replaced by a random constant.
fn draw_pos_relative(head: &Relation, constants: u32, budget: usize, rng: &mut StdRng) -> NegativeSampleSet {
    let arity = head.arity();
    if constants == 0 || arity == 0 || budget == 0 || head.is_empty() {
        return NegativeSampleSet::new(arity, Vec::new());
    }
    let mut seen: HashSet<Vec<u32>> = HashSet::with_capacity(budget);
    let mut tuples = Vec::with_capacity(budget * arity);
    let mut attempts = budget.saturating_mul(DRAW_ATTEMPTS_PER_SAMPLE);
    while seen.len() < budget && attempts > 0 {
        attempts -= 1;
        let mut tuple = head.row(rng.gen_range(0..head.len())).to_vec();
        tuple[rng.gen_range(0..arity)] = rng.gen_range(1..=constants);
        if head.contains(&tuple) || seen.contains(&tuple) {
            continue;
        }
        tuples.extend_from_slice(&tuple);
        seen.insert(tuple);
    }
    NegativeSampleSet::new(arity, tuples)
}

/// Up to `budget` distinct tuples drawn uniformly from the complement of
/// `head` over constants `1..=constants`.
fn draw_uniform(head: &Relation, constants: u32, budget: usize, rng: &mut StdRng) -> NegativeSampleSet {
    let arity = head.arity();
    if constants == 0 || arity == 0 || budget == 0 {
        return NegativeSampleSet::new(arity, Vec::new());
    }
    let mut seen: HashSet<Vec<u32>> = HashSet::with_capacity(budget);
    let mut tuples = Vec::with_capacity(budget * arity);
    let mut attempts = budget.saturating_mul(DRAW_ATTEMPTS_PER_SAMPLE);
    while seen.len() < budget && attempts > 0 {
        attempts -= 1;
        let tuple: Vec<u32> = (0..arity).map(|_| rng.gen_range(1..=constants)).collect();
        if head.contains(&tuple) || seen.contains(&tuple) {
            continue;
        }
        tuples.extend_from_slice(&tuple);
        seen.insert(tuple);
    }
    NegativeSampleSet::new(arity, tuples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvalCache;
    use crate::rule::Rule;

    fn kb(rows: usize) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("t");
        let records: Vec<Vec<String>> = (0..rows)
            .map(|i| vec![format!("c{i}"), format!("c{}", (i + 1) % rows)])
            .collect();
        kb.add_records("r", &records).unwrap();
        kb
    }

    #[test]
    fn test_budgeted_draws_at_most_budget() {
        let kb = kb(100);
        let head = kb.relation(0).unwrap();
        let mode = SamplingMode::Budgeted { factor: 0.5 };
        let sampler = NegativeSampler::for_relation(
            mode,
            NegativeStrategy::Uniform,
            &kb,
            head,
            None,
            false,
            1,
        );
        let samples = sampler.samples().unwrap();
        assert!(samples.len() <= 50);
        assert!(!samples.is_empty());
        assert!(samples.tuples().all(|t| !head.contains(t)));
    }

    #[test]
    fn test_budgeted_is_deterministic() {
        let kb = kb(40);
        let head = kb.relation(0).unwrap();
        let mode = SamplingMode::Budgeted { factor: 0.5 };
        let a = NegativeSampler::for_relation(mode, NegativeStrategy::Uniform, &kb, head, None, false, 9);
        let b = NegativeSampler::for_relation(mode, NegativeStrategy::Uniform, &kb, head, None, false, 9);
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn test_weighted_sum_matches_closed_world_for_most_general_rule() {
        let kb = kb(10);
        let head = kb.relation(0).unwrap();
        let mode = SamplingMode::Budgeted { factor: 0.9 };
        let sampler = NegativeSampler::for_relation(
            mode,
            NegativeStrategy::Uniform,
            &kb,
            head,
            None,
            true,
            3,
        );
        let rule = Rule::most_general(0, 2);
        let ent = EvalCache::root(head).entailment(&rule, &kb).unwrap();
        let weighted = sampler.negatives(&ent);
        // Every sample is entailed by h(?,?), so weights add up to the gaps
        // they hit; never more than the full closed-world complement.
        assert!(weighted > 0.0);
        assert!(weighted <= ent.cwa_negatives() + 1e-9);
    }

    #[test]
    fn test_adversarial_takes_hardest_negatives() {
        let kb = kb(10);
        let head = kb.relation(0).unwrap();
        let rule = Rule::most_general(0, 2);
        let ent = EvalCache::root(head).entailment(&rule, &kb).unwrap();
        // 100 - 10 = 90 negatives, budget 10 * 10 = 100: exact.
        let sampler = NegativeSampler::for_relation(
            SamplingMode::Adversarial { factor: 10.0 },
            NegativeStrategy::Uniform,
            &kb,
            head,
            None,
            false,
            0,
        );
        assert!((sampler.negatives(&ent) - ent.cwa_negatives()).abs() < 1e-9);

        // Budget 20 < 90: the whole budget is spent on entailed negatives.
        let sampler = NegativeSampler::for_relation(
            SamplingMode::Adversarial { factor: 2.0 },
            NegativeStrategy::Uniform,
            &kb,
            head,
            None,
            false,
            0,
        );
        assert!((sampler.negatives(&ent) - 20.0).abs() < 1e-9);
    }

    fn diagonal(pos: &KnowledgeBase) -> NegativeKb {
        let mut neg = KnowledgeBase::new("neg");
        let records: Vec<Vec<String>> = (0..10).map(|i| vec![format!("c{i}"), format!("c{i}")]).collect();
        neg.add_records("r", &records).unwrap();
        NegativeKb::remap(&neg, pos)
    }

    #[test]
    fn test_budgeted_draws_from_supplied_negatives() {
        let kb = kb(10);
        let head = kb.relation(0).unwrap();
        let negatives = diagonal(&kb);
        let pool = negatives.relation(0).unwrap();
        let mode = SamplingMode::Budgeted { factor: 0.5 };
        let sampler = NegativeSampler::for_relation(
            mode,
            NegativeStrategy::Uniform,
            &kb,
            head,
            Some(&negatives),
            false,
            4,
        );
        let samples = sampler.samples().unwrap();
        assert_eq!(samples.len(), 5);
        assert!(samples.tuples().all(|t| t[0] == t[1]));
        assert!(samples.tuples().all(|t| pool.tuples().any(|p| p == t)));
    }

    #[test]
    fn test_adversarial_picks_within_supplied_negatives() {
        let kb = kb(10);
        let head = kb.relation(0).unwrap();
        let negatives = diagonal(&kb);
        let rule = Rule::most_general(0, 2);
        let ent = EvalCache::root(head).entailment(&rule, &kb).unwrap();
        // 10 diagonal negatives, budget 3.
        let mode = SamplingMode::Adversarial { factor: 0.3 };
        let sampler = NegativeSampler::for_relation(
            mode,
            NegativeStrategy::Uniform,
            &kb,
            head,
            Some(&negatives),
            false,
            0,
        );
        assert!((sampler.negatives(&ent) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hardest_prefers_heavy_tuples() {
        let kb = kb(4);
        let head = kb.relation(0).unwrap();
        let rule = Rule::most_general(0, 2);
        let ent = EvalCache::root(head).entailment(&rule, &kb).unwrap();
        let set = NegativeSampleSet {
            arity: 2,
            tuples: vec![1, 1, 2, 2, 3, 3],
            weights: Some(vec![1.0, 5.0, 2.0]),
        };
        assert!((set.hardest_entailed_by(&ent, 2) - 7.0).abs() < 1e-9);
        assert!((set.hardest_entailed_by(&ent, 5) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_pos_relative_changes_one_argument() {
        let kb = kb(30);
        let head = kb.relation(0).unwrap();
        let mode = SamplingMode::Budgeted { factor: 0.5 };
        let sampler = NegativeSampler::for_relation(
            mode,
            NegativeStrategy::PositiveRelative,
            &kb,
            head,
            None,
            false,
            2,
        );
        let samples = sampler.samples().unwrap();
        assert!(!samples.is_empty());
        assert!(samples.len() <= 15);
        for t in samples.tuples() {
            assert!(!head.contains(t));
            assert!(head.rows().any(|row| row.iter().zip(t).filter(|(a, b)| a != b).count() == 1));
        }
    }

    #[test]
    fn test_neg_interval_samples_gap_bounds() {
        let kb = kb(10);
        let head = kb.relation(0).unwrap();
        let bounds = NegativeSampleSet::new(2, interval_bounds(head, kb.constant_count()));
        let mode = SamplingMode::Budgeted { factor: 0.5 };
        let sampler = NegativeSampler::for_relation(
            mode,
            NegativeStrategy::NegativeInterval,
            &kb,
            head,
            None,
            false,
            5,
        );
        let samples = sampler.samples().unwrap();
        assert_eq!(samples.len(), 5);
        assert!(samples.tuples().all(|t| bounds.tuples().any(|b| b == t)));
        assert!(samples.tuples().all(|t| !head.contains(t)));
    }

    #[test]
    fn test_remap_by_name() {
        let pos = kb(3);
        let mut neg = KnowledgeBase::new("neg");
        neg.add_records("r", &[vec!["c1", "c1"], vec!["zz", "c0"]]).unwrap();
        let remapped = NegativeKb::remap(&neg, &pos);
        let set = remapped.relation(0).unwrap();
        assert_eq!(set.len(), 1);
        let c1 = pos.dictionary().id("c1").unwrap();
        assert_eq!(set.tuples().next().unwrap(), &[c1, c1]);
    }
}
