//! Template pre-pass: fast matching of fixed rule shapes.
//!
//! Each miner enumerates candidate instantiations of its shape, using
//! [`ColumnOverlap`] to skip relation pairs whose columns cannot cover enough
//! head facts, and computes the candidate's entailment set with sorted set
//! algebra. [`TemplatePass`] evaluates candidates, marks the facts of
//! accepted ones entailed, and collects the matches for reporting.

mod miners;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, KbError};
use crate::eval::Eval;
use crate::kb::{ColumnRef, KnowledgeBase};
use crate::rule::Rule;

pub use miners::{
    DualMiner, ReflexiveMiner, SharedSourceSinkMiner, SubsumptionMiner, TransitionMiner, TypeInferenceMiner,
};

/// Thresholds applied to every template candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Minimum share of the head relation a match must entail.
    pub coverage: f64,
    /// Minimum compression ratio `τ = pos / (neg + len)`, the `τ` column of
    /// the report.
    pub tau: f64,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            coverage: 0.2,
            tau: 0.8,
        }
    }
}

/// A rule instantiating a template, with its sorted entailment set.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Head relation id.
    pub head: usize,
    /// The instantiated rule.
    pub rule: Rule,
    /// Entailed head tuples, row-major, sorted and deduplicated.
    pub entailments: Vec<u32>,
}

/// An accepted template instantiation.
#[derive(Debug, Clone)]
pub struct TemplateMatch {
    /// Template name.
    pub template: &'static str,
    /// Head relation id.
    pub head: usize,
    /// The rule.
    pub rule: Rule,
    /// Rendered rule.
    pub text: String,
    /// Evaluation against the whole head relation.
    pub eval: Eval,
    /// Share of head facts entailed.
    pub coverage: f64,
    /// Head rows this match newly marked entailed, sorted.
    pub entailed: Vec<u32>,
}

/// A fixed rule shape.
pub trait TemplateMiner: Send + Sync {
    /// Template name, used in the registry and in report file names.
    fn name(&self) -> &'static str;

    /// All instantiations worth evaluating.
    fn candidates(&self, kb: &KnowledgeBase, overlap: &ColumnOverlap) -> Vec<Candidate>;
}

/// For every column, the columns whose values cover enough of its rows.
///
/// Column `b` is listed for column `a` when the rows of `a` holding a value
/// that also occurs in `b` make up at least the coverage threshold. A
/// template whose head column is fed by `b` cannot reach the threshold
/// otherwise, so this is a necessary condition, not a heuristic.
#[derive(Debug, Clone, Default)]
pub struct ColumnOverlap {
    similar: HashMap<ColumnRef, Vec<ColumnRef>>,
}

impl ColumnOverlap {
    /// Builds the overlap table from the KB's column index.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(kb: &KnowledgeBase, coverage: f64) -> Self {
        let index = kb.column_index();
        let mut similar = HashMap::new();
        for rel in kb.relations().iter().filter(|r| !r.is_empty()) {
            let threshold = ((rel.len() as f64 * coverage).ceil() as usize).max(1);
            for col in 0..rel.arity() {
                let mut counts: HashMap<ColumnRef, usize> = HashMap::new();
                for value in rel.column_values(col) {
                    let freq = rel.frequency(col, value);
                    for &other in index.get(&value).map_or(&[][..], Vec::as_slice) {
                        *counts.entry(other).or_default() += freq;
                    }
                }
                let mut cols: Vec<ColumnRef> = counts
                    .into_iter()
                    .filter(|&(_, n)| n >= threshold)
                    .map(|(c, _)| c)
                    .collect();
                cols.sort_unstable();
                similar.insert((rel.id(), col), cols);
            }
        }
        Self { similar }
    }

    /// Columns similar to `(relation, column)`, sorted. Includes the column
    /// itself.
    #[must_use]
    pub fn similar(&self, relation: usize, column: usize) -> &[ColumnRef] {
        self.similar
            .get(&(relation, column))
            .map_or(&[], Vec::as_slice)
    }

    /// True if `other` is similar to `column`.
    #[must_use]
    pub fn is_similar(&self, column: ColumnRef, other: ColumnRef) -> bool {
        self.similar(column.0, column.1).binary_search(&other).is_ok()
    }
}

/// Named template miners.
#[derive(Clone)]
pub struct TemplateRegistry {
    miners: Vec<Arc<dyn TemplateMiner>>,
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl TemplateRegistry {
    /// Every template, including the deprecated reflexive one.
    #[must_use]
    pub fn all() -> Self {
        let miners: [Arc<dyn TemplateMiner>; 6] = [
            Arc::new(TypeInferenceMiner),
            Arc::new(ReflexiveMiner),
            Arc::new(SubsumptionMiner),
            Arc::new(DualMiner),
            Arc::new(TransitionMiner),
            Arc::new(SharedSourceSinkMiner),
        ];
        Self {
            miners: miners.into(),
        }
    }

    /// Every template except the reflexive one.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::all();
        registry.miners.retain(|m| m.name() != ReflexiveMiner.name());
        registry
    }

    /// The named templates, in the given order.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownTemplate`] for an unknown name.
    pub fn select<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let all = Self::all();
        let miners = names
            .iter()
            .map(|name| {
                all.get(name.as_ref())
                    .ok_or_else(|| ConfigError::UnknownTemplate {
                        name: name.as_ref().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { miners })
    }

    /// Miner by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn TemplateMiner>> {
        self.miners.iter().find(|m| m.name() == name).cloned()
    }

    /// Registered names, in run order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.miners.iter().map(|m| m.name())
    }

    /// Registered miners, in run order.
    #[must_use]
    pub fn miners(&self) -> &[Arc<dyn TemplateMiner>] {
        &self.miners
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Matches of one template.
#[derive(Debug, Clone)]
pub struct TemplateReport {
    /// Template name.
    pub template: &'static str,
    /// Accepted matches, in discovery order.
    pub matches: Vec<TemplateMatch>,
}

impl TemplateReport {
    /// Writes `rules_<template>.tsv` into `dir`, sorted by compression ratio.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<PathBuf, KbError> {
        fs::create_dir_all(dir).map_err(|e| KbError::io(dir, e))?;
        let mut sorted: Vec<&TemplateMatch> = self.matches.iter().collect();
        sorted.sort_by(|a, b| {
            b.eval
                .ratio()
                .total_cmp(&a.eval.ratio())
                .then_with(|| a.text.cmp(&b.text))
        });
        let mut out = String::from("rule\t|r|\tE+\tE-\tFC\tτ\tδ\n");
        for m in sorted {
            #[allow(clippy::cast_possible_truncation)]
            let delta = m.eval.capacity() as i64;
            // Writing into a String cannot fail.
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{:.0}\t{:.2}\t{:.2}\t{}",
                m.text,
                m.eval.length(),
                m.eval.pos(),
                m.eval.neg(),
                m.coverage,
                m.eval.ratio(),
                delta
            );
        }
        let path = dir.join(format!("rules_{}.tsv", self.template));
        fs::write(&path, out).map_err(|e| KbError::io(&path, e))?;
        Ok(path)
    }
}

/// Runs registered templates against a KB.
#[derive(Debug, Clone)]
pub struct TemplatePass {
    registry: TemplateRegistry,
    config: TemplateConfig,
}

impl TemplatePass {
    /// Creates a pass.
    #[must_use]
    pub const fn new(registry: TemplateRegistry, config: TemplateConfig) -> Self {
        Self { registry, config }
    }

    /// Runs every template in order. Accepted range-restricted matches mark
    /// their head facts entailed; others are only reported.
    pub fn run(&self, kb: &mut KnowledgeBase) -> Vec<TemplateReport> {
        let overlap = ColumnOverlap::new(kb, self.config.coverage);
        let mut reports = Vec::with_capacity(self.registry.miners.len());
        for miner in &self.registry.miners {
            let candidates = miner.candidates(kb, &overlap);
            let checked = candidates.len();
            let matches: Vec<TemplateMatch> = candidates
                .into_iter()
                .filter_map(|c| check_then_mark(kb, &self.config, miner.name(), c))
                .collect();
            info!(
                template = miner.name(),
                checked,
                matched = matches.len(),
                "template matched"
            );
            reports.push(TemplateReport {
                template: miner.name(),
                matches,
            });
        }
        reports
    }
}

/// Evaluates one candidate against the whole head relation and, if it passes
/// both thresholds, marks its positive entailments.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn check_then_mark(
    kb: &mut KnowledgeBase,
    config: &TemplateConfig,
    template: &'static str,
    candidate: Candidate,
) -> Option<TemplateMatch> {
    let head = kb.relation(candidate.head)?;
    if head.is_empty() || head.arity() == 0 {
        return None;
    }
    let rows = head.len() as f64;
    let all = candidate.entailments.len() / head.arity();
    if (all as f64) / rows < config.coverage {
        return None;
    }
    let positives = head.intersect_sorted(&candidate.entailments);
    let coverage = positives.len() as f64 / rows;
    let eval = Eval::new(positives.len(), (all - positives.len()) as f64, candidate.rule.length());
    if coverage < config.coverage || eval.ratio() < config.tau {
        return None;
    }
    let text = candidate.rule.display(kb).to_string();
    let entailed: Vec<u32> = positives
        .iter()
        .filter(|&&r| !head.is_entailed(r))
        .map(|&r| r as u32)
        .collect();
    let entailed = if candidate.rule.is_range_restricted() {
        kb.mark_entailed(candidate.head, positives);
        debug!(template, rule = %text, eval = %eval, "template rule accepted");
        entailed
    } else {
        debug!(template, rule = %text, "template rule reported only: not range-restricted");
        Vec::new()
    };
    Some(TemplateMatch {
        template,
        head: candidate.head,
        rule: candidate.rule,
        text,
        eval,
        coverage,
        entailed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("t");
        let mut parent = Vec::new();
        let mut child = Vec::new();
        for i in 0..20 {
            parent.push(vec![format!("a{i}"), format!("b{i}")]);
            child.push(vec![format!("b{i}"), format!("a{i}")]);
        }
        kb.add_records("parent", &parent).unwrap();
        kb.add_records("child", &child).unwrap();
        kb.add_records("noise", &[vec!["x", "y"]]).unwrap();
        kb
    }

    #[test]
    fn test_column_overlap() {
        let kb = kb();
        let overlap = ColumnOverlap::new(&kb, 0.2);
        let parent = kb.relation_id("parent").unwrap();
        let child = kb.relation_id("child").unwrap();
        let noise = kb.relation_id("noise").unwrap();
        assert!(overlap.is_similar((parent, 0), (child, 1)));
        assert!(overlap.is_similar((parent, 0), (parent, 0)));
        assert!(!overlap.is_similar((parent, 0), (child, 0)));
        assert!(!overlap.is_similar((parent, 0), (noise, 0)));
    }

    #[test]
    fn test_registry() {
        let standard = TemplateRegistry::standard();
        assert_eq!(standard.names().count(), 5);
        assert!(standard.get("Reflexive").is_none());
        assert!(TemplateRegistry::all().get("Reflexive").is_some());

        let picked = TemplateRegistry::select(&["Dual", "Transition"]).unwrap();
        assert_eq!(picked.names().collect::<Vec<_>>(), vec!["Dual", "Transition"]);
        assert!(matches!(
            TemplateRegistry::select(&["Nope"]),
            Err(ConfigError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn test_pass_marks_dual_once() {
        let mut kb = kb();
        let pass = TemplatePass::new(TemplateRegistry::select(&["Dual"]).unwrap(), TemplateConfig::default());
        let reports = pass.run(&mut kb);
        let matches = &reports[0].matches;
        // child(X,Y):-parent(Y,X) and parent(X,Y):-child(Y,X); the second
        // finds its rows unmarked too, so both mark 20 rows.
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.eval.pos() == 20 && m.entailed.len() == 20));
        assert_eq!(kb.relation_by_name("parent").unwrap().entailed_count(), 20);
        assert_eq!(kb.relation_by_name("child").unwrap().entailed_count(), 20);
    }

    #[test]
    fn test_report_dump() {
        let mut kb = kb();
        let pass = TemplatePass::new(TemplateRegistry::select(&["Dual"]).unwrap(), TemplateConfig::default());
        let reports = pass.run(&mut kb);
        let dir = tempfile::tempdir().unwrap();
        let path = reports[0].dump(dir.path()).unwrap();
        assert!(path.ends_with("rules_Dual.tsv"));
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "rule\t|r|\tE+\tE-\tFC\tτ\tδ");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("\t2\t20\t0\t1.00\t10.00\t18"));
    }

    /// `parent(X,Y):-child(Y,X)` entailing every parent fact plus `extra`
    /// tuples that are not parent facts.
    fn inverse_with_extra(kb: &KnowledgeBase, extra: usize) -> Candidate {
        let parent = kb.relation_by_name("parent").unwrap();
        let rule = crate::rule::RuleParser::new()
            .unwrap()
            .parse("parent(X,Y):-child(Y,X)", kb)
            .unwrap();
        let a = |i: usize| kb.dictionary().id(&format!("a{i}")).unwrap();
        let mut rows: Vec<Vec<u32>> = parent.rows().map(<[u32]>::to_vec).collect();
        rows.extend(
            (0..20)
                .flat_map(|i| (0..20).map(move |j| (i, j)))
                .filter(|(i, j)| i != j)
                .take(extra)
                .map(|(i, j)| vec![a(i), a(j)]),
        );
        rows.sort_unstable();
        Candidate {
            head: parent.id(),
            rule,
            entailments: rows.concat(),
        }
    }

    #[test]
    fn test_acceptance_gates_on_reported_ratio() {
        let config = TemplateConfig::default();

        // 20 / (16 + 2) = 1.11: accepted although the rate is only 0.53.
        let mut loose = kb();
        let candidate = inverse_with_extra(&loose, 16);
        let m = check_then_mark(&mut loose, &config, "Dual", candidate).unwrap();
        assert!(m.eval.ratio() >= config.tau);
        assert!(m.eval.rate() < config.tau);
        assert_eq!(m.entailed.len(), 20);

        // 20 / (30 + 2) = 0.63.
        let mut noisy = kb();
        let candidate = inverse_with_extra(&noisy, 30);
        assert!(check_then_mark(&mut noisy, &config, "Dual", candidate).is_none());
        assert_eq!(noisy.relation_by_name("parent").unwrap().entailed_count(), 0);
    }
}
