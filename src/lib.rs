//! # relcomp - Lossless knowledge base compression by Horn rule mining
//!
//! relcomp compresses a relational knowledge base (fixed-arity tuples over
//! symbolic constants) by mining first-order Horn rules that re-derive most
//! of its facts. The output keeps only the rules, the facts no rule covers,
//! and the counterexamples the rules would wrongly derive.
//!
//! ## Core Concepts
//!
//! - **KnowledgeBase**: constant dictionary plus sorted, indexed relations
//! - **Rule**: a Horn clause specialized one operator at a time
//! - **IndexedRule**: a rule with a refreshed evaluation cache and score
//! - **BeamSearch**: finds one rule per round for a head relation
//! - **CompressedKb**: rules, residual facts and counterexamples
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relcomp::{Compressor, KbLocation, RunConfig};
//!
//! let mut config = RunConfig::new(KbLocation::new("datasets", "family"));
//! config.validate = true;
//! let summary = Compressor::new(config)?.run()?;
//! println!("{} rules, {} residual facts", summary.rules, summary.residual_facts);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod error;
pub mod eval;
pub mod kb;
pub mod rule;

// Evaluation and search
pub mod cache;
pub mod sampling;
pub mod search;

// Pre-pass, output and validation
pub mod compress;
pub mod graph;
pub mod template;
pub mod validate;

pub use compress::{CompressedKb, Compression, Compressor, RunSummary};
pub use config::{KbLocation, MinerConfig, MinerConfigBuilder, NegativeStrategy, RunConfig, SamplingMode};
pub use error::{ConfigError, KbError, RelcompError, RelcompResult, RuleError};
pub use eval::{Eval, EvalMetric};
pub use graph::DependencyGraph;
pub use kb::{Dictionary, KnowledgeBase, Relation};
pub use rule::{IndexedRule, Rule, RuleParser, SpecOp, UnindexedRule};
pub use sampling::{NegativeKb, NegativeSampler};
pub use search::{mine_relation, AcceptedRule, BeamSearch};
pub use template::{TemplateConfig, TemplatePass, TemplateRegistry};
pub use validate::{decompress, validate, ValidationReport};
