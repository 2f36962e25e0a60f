//! A whole compression run and its output artifact.
//!
//! [`Compressor`] owns the run: load the KB, optionally run the template
//! pre-pass, mine every relation in id order, break dependency cycles, write
//! the [`CompressedKb`] and the run summary, and optionally validate.
//!
//! A compressed KB directory holds the residual facts in the regular KB
//! layout plus:
//! - `rules.hyp`: one rule per line;
//! - `<k>.ceg`: counterexamples of relation `k` (framed like `.rel` files),
//!   only for relations that have any;
//! - `summary.json`: run statistics.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{MinerConfig, RunConfig};
use crate::error::{ConfigError, KbError, RelcompError, RelcompResult, RuleError};
use crate::graph::{DependencyGraph, FactId};
use crate::kb::codec;
use crate::kb::store::write_rel_file;
use crate::kb::KnowledgeBase;
use crate::rule::{IndexedRule, Rule, RuleParser};
use crate::sampling::{NegativeKb, NegativeSampler};
use crate::search::{mine_relation, AcceptedRule};
use crate::template::{TemplateConfig, TemplatePass, TemplateRegistry, TemplateReport};
use crate::validate::{validate, ValidationReport};

/// Rule file.
pub const RULES_FILE: &str = "rules.hyp";
/// Run summary file.
pub const SUMMARY_FILE: &str = "summary.json";
/// Extension of counterexample files.
pub const CEG_EXT: &str = "ceg";

/// Rules, residual facts and counterexamples.
#[derive(Debug, Clone)]
pub struct CompressedKb {
    residual: KnowledgeBase,
    rules: Vec<Rule>,
    counterexamples: Vec<Vec<u32>>,
}

impl CompressedKb {
    /// Assembles a compressed KB. `counterexamples[k]` holds the
    /// counterexamples of relation `k`, row-major.
    ///
    /// # Errors
    /// Returns a rule error for a rule that is not range-restricted or does
    /// not fit the residual KB, and a KB error for counterexamples that do
    /// not fit their relation.
    pub fn new(residual: KnowledgeBase, rules: Vec<Rule>, counterexamples: Vec<Vec<u32>>) -> RelcompResult<Self> {
        for rule in &rules {
            if !rule.is_range_restricted() {
                return Err(RuleError::InvalidStructure {
                    reason: format!("'{}' is not range-restricted", rule.display(&residual)),
                }
                .into());
            }
            let fits = rule
                .literals()
                .iter()
                .all(|l| residual.relation(l.relation).is_some_and(|r| r.arity() == l.args.len()));
            if !fits {
                return Err(RelcompError::internal(format!(
                    "rule '{}' does not fit the knowledge base",
                    rule.display(&residual)
                )));
            }
        }
        if counterexamples.len() != residual.relations().len() {
            return Err(RelcompError::internal(format!(
                "{} counterexample sets for {} relations",
                counterexamples.len(),
                residual.relations().len()
            )));
        }
        let mut sorted = Vec::with_capacity(counterexamples.len());
        for (rel, data) in residual.relations().iter().zip(counterexamples) {
            if rel.arity() == 0 || data.len() % rel.arity() != 0 {
                if data.is_empty() {
                    sorted.push(data);
                    continue;
                }
                return Err(KbError::ArityMismatch {
                    name: rel.name().to_string(),
                    expected: rel.arity(),
                    actual: data.len(),
                }
                .into());
            }
            let mut rows: Vec<&[u32]> = data.chunks_exact(rel.arity()).collect();
            rows.sort_unstable();
            rows.dedup();
            sorted.push(rows.concat());
        }
        Ok(Self {
            residual,
            rules,
            counterexamples: sorted,
        })
    }

    /// Builds the output of a mining run: residual = facts never entailed
    /// plus the feedback vertex set.
    ///
    /// # Errors
    /// Returns an error if an accepted rule does not fit `kb`.
    pub fn from_mining(
        kb: &KnowledgeBase,
        name: &str,
        rules: &[AcceptedRule],
        feedback: &[FactId],
    ) -> RelcompResult<Self> {
        let mut relations = Vec::with_capacity(kb.relations().len());
        let mut counterexamples = vec![Vec::new(); kb.relations().len()];
        for rel in kb.relations() {
            let mut data = Vec::new();
            for row in rel.residual_rows() {
                data.extend_from_slice(rel.row(row));
            }
            for &(_, row) in feedback.iter().filter(|(r, _)| *r == rel.id()) {
                data.extend_from_slice(rel.row(row as usize));
            }
            relations.push((rel.name().to_string(), rel.arity(), data));
        }
        for rule in rules {
            if let Some(ceg) = counterexamples.get_mut(rule.relation) {
                ceg.extend(rule.counterexamples.iter().flatten().copied());
            }
        }
        let residual = KnowledgeBase::from_parts(name, kb.dictionary().clone(), relations)?;
        Self::new(residual, rules.iter().map(|r| r.rule.clone()).collect(), counterexamples)
    }

    /// Residual facts, with the dictionary and every relation.
    #[must_use]
    pub const fn residual(&self) -> &KnowledgeBase {
        &self.residual
    }

    /// Rules, in acceptance order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Counterexamples of relation `id`, row-major and sorted.
    #[must_use]
    pub fn counterexamples(&self, id: usize) -> &[u32] {
        self.counterexamples.get(id).map_or(&[], Vec::as_slice)
    }

    /// Number of counterexample tuples.
    #[must_use]
    pub fn counterexample_count(&self) -> usize {
        self.residual
            .relations()
            .iter()
            .map(|r| self.counterexamples(r.id()).len() / r.arity().max(1))
            .sum()
    }

    /// Sum of rule lengths.
    #[must_use]
    pub fn rule_length(&self) -> usize {
        self.rules.iter().map(Rule::length).sum()
    }

    /// Writes the compressed KB into `dir`.
    ///
    /// # Errors
    /// Returns an error if any file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<(), KbError> {
        self.residual.dump(dir)?;
        for rel in self.residual.relations() {
            let path = dir.join(format!("{}.{CEG_EXT}", rel.id()));
            let data = self.counterexamples(rel.id());
            if data.is_empty() {
                if path.exists() {
                    fs::remove_file(&path).map_err(|e| KbError::io(&path, e))?;
                }
                continue;
            }
            write_rel_file(&path, rel.arity(), data)?;
        }
        let path = dir.join(RULES_FILE);
        let file = File::create(&path).map_err(|e| KbError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        for rule in &self.rules {
            writeln!(writer, "{}", rule.display(&self.residual)).map_err(|e| KbError::io(&path, e))?;
        }
        writer.flush().map_err(|e| KbError::io(&path, e))
    }

    /// Loads a compressed KB from `dir`.
    ///
    /// # Errors
    /// Returns an error if a file is missing or malformed, or a rule cannot
    /// be parsed.
    pub fn load(dir: &Path) -> RelcompResult<Self> {
        let residual = KnowledgeBase::load(dir)?;
        let mut counterexamples = Vec::with_capacity(residual.relations().len());
        for rel in residual.relations() {
            let path = dir.join(format!("{}.{CEG_EXT}", rel.id()));
            if !path.exists() {
                counterexamples.push(Vec::new());
                continue;
            }
            let file = File::open(&path).map_err(|e| KbError::io(&path, e))?;
            let (arity, data) = codec::decode_relation(&mut BufReader::new(file)).map_err(|e| KbError::Corrupted {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            if arity != rel.arity() {
                return Err(KbError::Corrupted {
                    path,
                    reason: format!("arity {arity} does not match relation '{}'", rel.name()),
                }
                .into());
            }
            counterexamples.push(data);
        }

        let path = dir.join(RULES_FILE);
        let text = fs::read_to_string(&path).map_err(|e| KbError::io(&path, e))?;
        let parser = RuleParser::new()?;
        let rules = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| parser.parse(l, &residual))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(residual, rules, counterexamples)
    }
}

/// Per-relation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSummary {
    /// Relation name.
    pub name: String,
    /// Facts in the input.
    pub facts: usize,
    /// Facts kept in the residual (including the feedback vertex set).
    pub residual: usize,
    /// Rules with this head.
    pub rules: usize,
}

/// Statistics of one run, written to `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Input KB name.
    pub kb: String,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u128,
    /// Search parameters.
    pub config: MinerConfig,
    /// Facts in the input.
    pub total_facts: usize,
    /// Facts in the residual.
    pub residual_facts: usize,
    /// Residual facts kept only to break dependency cycles.
    pub feedback_facts: usize,
    /// Counterexample tuples.
    pub counterexamples: usize,
    /// Accepted rules.
    pub rules: usize,
    /// Accepted rules that came from the template pre-pass.
    pub template_rules: usize,
    /// Sum of rule lengths.
    pub rule_length: usize,
    /// `(residual + counterexamples + rule length) / total facts`.
    pub compressed_ratio: f64,
    /// Per-relation statistics.
    pub relations: Vec<RelationSummary>,
    /// Validation outcome, if validation ran.
    pub validation: Option<ValidationReport>,
}

impl RunSummary {
    /// Writes the summary as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn dump(&self, path: &Path) -> Result<(), KbError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| KbError::Summary {
            message: e.to_string(),
        })?;
        fs::write(path, json).map_err(|e| KbError::io(path, e))
    }
}

/// Result of compressing an in-memory KB.
#[derive(Debug, Clone)]
pub struct Compression {
    /// The input KB, with entailment marks.
    pub kb: KnowledgeBase,
    /// The output.
    pub compressed: CompressedKb,
    /// Accepted rules, templates first, then per relation in id order.
    pub rules: Vec<AcceptedRule>,
    /// Number of leading `rules` that came from templates.
    pub template_rules: usize,
    /// Template pre-pass reports, if it ran.
    pub templates: Vec<TemplateReport>,
    /// Facts moved back into the residual to break cycles.
    pub feedback: Vec<FactId>,
}

/// Runs compressions.
#[derive(Debug, Clone)]
pub struct Compressor {
    config: RunConfig,
    templates: TemplateRegistry,
    template_config: TemplateConfig,
}

impl Compressor {
    /// Creates a compressor; the miner configuration is normalized and
    /// validated here.
    ///
    /// # Errors
    /// Returns a configuration error for out-of-range parameters or an
    /// input location without a name.
    pub fn new(mut config: RunConfig) -> Result<Self, ConfigError> {
        if config.input.name.is_empty() {
            return Err(ConfigError::MissingInput);
        }
        config.miner = config.miner.normalized();
        config.miner.validate()?;
        Ok(Self {
            config,
            templates: TemplateRegistry::standard(),
            template_config: TemplateConfig::default(),
        })
    }

    /// Replaces the template registry and thresholds.
    #[must_use]
    pub fn with_templates(mut self, registry: TemplateRegistry, config: TemplateConfig) -> Self {
        self.templates = registry;
        self.template_config = config;
        self
    }

    /// Run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Compresses `kb` in memory.
    ///
    /// # Errors
    /// Returns an error if mining fails or an accepted rule cannot be
    /// re-indexed.
    pub fn compress(
        &self,
        mut kb: KnowledgeBase,
        negatives: Option<&NegativeKb>,
        run_templates: bool,
    ) -> RelcompResult<Compression> {
        let mut rules = Vec::new();
        let mut templates = Vec::new();
        if run_templates {
            templates = TemplatePass::new(self.templates.clone(), self.template_config).run(&mut kb);
            for m in templates.iter().flat_map(|r| &r.matches) {
                if m.entailed.is_empty() {
                    continue;
                }
                let indexed = IndexedRule::build(&m.rule, &kb, &NegativeSampler::closed_world())?;
                if let Some(mut accepted) = AcceptedRule::collect(&kb, &indexed, m.entailed.clone(), usize::MAX)? {
                    accepted.eval = m.eval;
                    rules.push(accepted);
                }
            }
        }
        let template_rules = rules.len();

        for head in 0..kb.relations().len() {
            let mined = mine_relation(&mut kb, head, &self.config.miner, negatives)?;
            if let Some(rel) = kb.relation(head) {
                info!(
                    relation = rel.name(),
                    rules = mined.len(),
                    entailed = rel.entailed_count(),
                    facts = rel.len(),
                    "relation mined"
                );
            }
            rules.extend(mined);
        }

        let mut graph = DependencyGraph::new();
        for rule in &rules {
            graph.add_evidence(rule.relation, &rule.evidence);
        }
        let feedback = graph.feedback_vertex_set();
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            feedback = feedback.len(),
            "dependency cycles broken"
        );

        let name = self.config.output_location().name;
        let compressed = CompressedKb::from_mining(&kb, &name, &rules, &feedback)?;
        Ok(Compression {
            kb,
            compressed,
            rules,
            template_rules,
            templates,
            feedback,
        })
    }

    /// Loads the input, compresses it, writes the output and the summary,
    /// and validates if configured.
    ///
    /// # Errors
    /// Returns an error if loading, mining or writing fails, or if
    /// validation finds a difference.
    pub fn run(&self) -> RelcompResult<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let kb = KnowledgeBase::load(&self.config.input.dir())?;
        let negatives = match &self.config.negative {
            Some(location) => {
                let negative = KnowledgeBase::load(&location.dir())?;
                Some(NegativeKb::remap(&negative, &kb))
            }
            None => None,
        };

        let compression = self.compress(kb, negatives.as_ref(), self.config.template_dir.is_some())?;
        if let Some(dir) = &self.config.template_dir {
            for report in &compression.templates {
                report.dump(dir)?;
            }
        }

        let out_dir = self.output_dir();
        compression.compressed.dump(&out_dir)?;

        let validation = if self.config.validate {
            let report = validate(&compression.kb, &compression.compressed)?;
            if report.is_sound() {
                info!(rounds = report.rounds, "validation passed");
            } else {
                warn!(
                    missing = report.missing,
                    extra = report.extra,
                    relations = ?report.mismatched,
                    "validation failed"
                );
            }
            Some(report)
        } else {
            None
        };

        let summary = summarize(&compression, &self.config.miner, started_at, clock.elapsed().as_millis(), validation);
        summary.dump(&out_dir.join(SUMMARY_FILE))?;
        info!(
            rules = summary.rules,
            residual = summary.residual_facts,
            facts = summary.total_facts,
            ratio = summary.compressed_ratio,
            "compression finished"
        );

        match &summary.validation {
            Some(report) if !report.is_sound() => Err(RelcompError::ValidationFailed {
                missing: report.missing,
                extra: report.extra,
            }),
            _ => Ok(summary),
        }
    }

    /// Directory the compressed KB is written to.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.config.output_location().dir()
    }
}

#[allow(clippy::cast_precision_loss)]
fn summarize(
    compression: &Compression,
    config: &MinerConfig,
    started_at: DateTime<Utc>,
    elapsed_ms: u128,
    validation: Option<ValidationReport>,
) -> RunSummary {
    let kb = &compression.kb;
    let compressed = &compression.compressed;
    let relations: Vec<RelationSummary> = kb
        .relations()
        .iter()
        .map(|rel| RelationSummary {
            name: rel.name().to_string(),
            facts: rel.len(),
            residual: compressed.residual().relation(rel.id()).map_or(0, |r| r.len()),
            rules: compression.rules.iter().filter(|r| r.relation == rel.id()).count(),
        })
        .collect();
    let total_facts = kb.total_facts();
    let residual_facts = compressed.residual().total_facts();
    let counterexamples = compressed.counterexample_count();
    let rule_length = compressed.rule_length();
    let compressed_ratio = if total_facts == 0 {
        0.0
    } else {
        (residual_facts + counterexamples + rule_length) as f64 / total_facts as f64
    };
    RunSummary {
        kb: kb.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        elapsed_ms,
        config: config.clone(),
        total_facts,
        residual_facts,
        feedback_facts: compression.feedback.len(),
        counterexamples,
        rules: compression.rules.len(),
        template_rules: compression.template_rules,
        rule_length,
        compressed_ratio,
        relations,
        validation,
    }
}
