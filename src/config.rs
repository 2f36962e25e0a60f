//! Run and miner configuration.
//!
//! `MinerConfig` carries every knob the search engine reads. It is plain data
//! (serde-serializable so it can be echoed into the run summary); callers go
//! through [`MinerConfig::normalized`] and [`MinerConfig::validate`] before a
//! run starts, so the engine never sees out-of-range values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::eval::EvalMetric;

/// Lowest admissible stopping rate: a rule at this rate saves nothing.
pub const MIN_STOP_RATE: f64 = 0.5;

/// Location of a knowledge base on disk: `<base>/<name>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbLocation {
    /// Parent directory.
    pub base: PathBuf,
    /// KB name, which is also the directory name.
    pub name: String,
}

impl KbLocation {
    /// Creates a location.
    pub fn new(base: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            name: name.into(),
        }
    }

    /// Directory holding the KB files.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.base.join(&self.name)
    }

    /// Default output location for a compressed KB: `<base>/<name>_comp`.
    #[must_use]
    pub fn compressed_sibling(&self) -> Self {
        Self::new(&self.base, format!("{}_comp", self.name))
    }

    /// Location of a KB stored directly in `dir`.
    #[must_use]
    pub fn from_dir(dir: &Path) -> Self {
        let base = dir.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(base, name)
    }
}

/// How counter-evidence is obtained for candidate rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Everything not in the KB is false; negatives are counted exactly.
    ClosedWorld,
    /// Negatives are the tuples of an external negative KB.
    ExactKb,
    /// Uniform random negatives, drawn once per head relation: from the
    /// negative KB if one is supplied, otherwise from the closed-world
    /// complement.
    Budgeted {
        /// Fraction of the head relation size to draw, in `(0, 1)`.
        factor: f64,
    },
    /// Per-rule hardest negatives: tuples the rule itself entails, taken
    /// from the negative KB if one is supplied.
    Adversarial {
        /// Multiple of the head relation size to draw, `>= 1`.
        factor: f64,
    },
}

impl SamplingMode {
    /// Sample budget for a head relation of `head_rows` facts.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn budget(self, head_rows: usize) -> usize {
        match self {
            Self::Budgeted { factor } | Self::Adversarial { factor } => {
                (factor * head_rows as f64).floor().max(0.0) as usize
            }
            Self::ClosedWorld | Self::ExactKb => 0,
        }
    }
}

/// How budgeted negatives are generated when no negative KB is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NegativeStrategy {
    /// Uniform tuples from the closed-world complement.
    #[default]
    Uniform,
    /// A positive fact with one argument replaced by a random constant.
    PositiveRelative,
    /// The first and last tuple of every gap between consecutive positive
    /// facts, in lexicographic order.
    NegativeInterval,
}

impl NegativeStrategy {
    /// Name used on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::PositiveRelative => "pos-relative",
            Self::NegativeInterval => "neg-interval",
        }
    }
}

impl fmt::Display for NegativeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NegativeStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "uniform" => Ok(Self::Uniform),
            "pos-relative" | "posRelative" => Ok(Self::PositiveRelative),
            "neg-interval" | "negInterval" => Ok(Self::NegativeInterval),
            other => Err(ConfigError::UnknownStrategy {
                name: other.to_string(),
            }),
        }
    }
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Negative sampling budget factor; 0 disables budgeted sampling.
    pub budget_factor: f64,
    /// Weight negative samples by the closed-world gap they stand for.
    pub weighted: bool,
    /// Generator for budgeted negatives without a negative KB.
    #[serde(default)]
    pub negative_strategy: NegativeStrategy,
    /// Worker threads used to score candidates.
    pub threads: usize,
    /// Beam width.
    pub beamwidth: usize,
    /// Metric used to rank candidates.
    pub eval_metric: EvalMetric,
    /// Minimum share of the head relation a candidate must newly cover.
    pub min_fact_coverage: f64,
    /// Minimum share of a column a constant must occupy to be bound.
    pub min_constant_coverage: f64,
    /// Compression rate at which a search branch stops early.
    pub stop_compression_rate: f64,
    /// Score candidates by estimation first, refreshing only the most
    /// promising ones exactly.
    pub estimation_enabled: bool,
    /// How many candidates (in multiples of the beam width) are refreshed
    /// exactly when estimation is enabled. Always `>= 1`.
    pub observation_scale: f64,
    /// Longest rule the search will build.
    pub max_rule_length: usize,
    /// Seed for every random choice.
    pub seed: u64,
    /// Accepted rules must not need more counterexamples than this.
    pub max_counterexamples: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            budget_factor: 0.0,
            weighted: false,
            negative_strategy: NegativeStrategy::Uniform,
            threads: 1,
            beamwidth: 3,
            eval_metric: EvalMetric::CompressionCapacity,
            min_fact_coverage: 0.05,
            min_constant_coverage: 0.25,
            stop_compression_rate: 0.9,
            estimation_enabled: true,
            observation_scale: 2.0,
            max_rule_length: 10,
            seed: 0,
            max_counterexamples: 1_000_000,
        }
    }
}

impl MinerConfig {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> MinerConfigBuilder {
        MinerConfigBuilder::default()
    }

    /// Applies a single "observation ratio" value: below 1 it disables
    /// estimation, otherwise it enables it with that scale.
    ///
    /// The mode is decided on the raw value, before any clamping.
    pub fn set_observation_ratio(&mut self, ratio: f64) {
        if ratio < 1.0 {
            self.estimation_enabled = false;
        } else {
            self.estimation_enabled = true;
            self.observation_scale = ratio;
        }
    }

    /// Clamps parameters into their working ranges.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.threads = self.threads.max(1);
        self.beamwidth = self.beamwidth.max(1);
        self.max_rule_length = self.max_rule_length.max(1);
        self.stop_compression_rate = self.stop_compression_rate.max(MIN_STOP_RATE);
        self.observation_scale = self.observation_scale.max(1.0);
        self
    }

    /// Rejects values that no clamping can repair.
    ///
    /// # Errors
    /// Returns [`ConfigError::OutOfRange`] for the first offending parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("min_fact_coverage", self.min_fact_coverage)?;
        check_unit("min_constant_coverage", self.min_constant_coverage)?;
        check_unit("stop_compression_rate", self.stop_compression_rate)?;
        if !self.budget_factor.is_finite() || self.budget_factor < 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "budget_factor",
                value: self.budget_factor,
                expected: ">= 0",
            });
        }
        if !self.observation_scale.is_finite() {
            return Err(ConfigError::OutOfRange {
                name: "observation_scale",
                value: self.observation_scale,
                expected: "finite",
            });
        }
        Ok(())
    }

    /// Sampling mode implied by the budget factor and whether a negative KB
    /// was supplied. A supplied negative KB is never ignored: with a budget
    /// it becomes the pool budgeted and adversarial samples come from.
    #[must_use]
    pub fn sampling_mode(&self, has_negative_kb: bool) -> SamplingMode {
        if self.budget_factor <= 0.0 {
            if has_negative_kb {
                SamplingMode::ExactKb
            } else {
                SamplingMode::ClosedWorld
            }
        } else if self.budget_factor < 1.0 {
            SamplingMode::Budgeted {
                factor: self.budget_factor,
            }
        } else {
            SamplingMode::Adversarial {
                factor: self.budget_factor,
            }
        }
    }

    /// Number of candidates refreshed exactly per round under estimation.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn observations(&self) -> usize {
        ((self.beamwidth as f64 * self.observation_scale).round() as usize).max(self.beamwidth)
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            expected: "[0, 1]",
        })
    }
}

/// Builder for [`MinerConfig`].
#[derive(Debug, Clone, Default)]
pub struct MinerConfigBuilder {
    config: MinerConfig,
}

impl MinerConfigBuilder {
    /// Negative sampling budget factor.
    #[must_use]
    pub fn budget_factor(mut self, factor: f64) -> Self {
        self.config.budget_factor = factor;
        self
    }

    /// Weighted negative samples.
    #[must_use]
    pub fn weighted(mut self, weighted: bool) -> Self {
        self.config.weighted = weighted;
        self
    }

    /// Budgeted negative generator.
    #[must_use]
    pub fn negative_strategy(mut self, strategy: NegativeStrategy) -> Self {
        self.config.negative_strategy = strategy;
        self
    }

    /// Worker thread count.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    /// Beam width.
    #[must_use]
    pub fn beamwidth(mut self, beamwidth: usize) -> Self {
        self.config.beamwidth = beamwidth;
        self
    }

    /// Ranking metric.
    #[must_use]
    pub fn eval_metric(mut self, metric: EvalMetric) -> Self {
        self.config.eval_metric = metric;
        self
    }

    /// Minimum fact coverage.
    #[must_use]
    pub fn min_fact_coverage(mut self, coverage: f64) -> Self {
        self.config.min_fact_coverage = coverage;
        self
    }

    /// Minimum constant coverage.
    #[must_use]
    pub fn min_constant_coverage(mut self, coverage: f64) -> Self {
        self.config.min_constant_coverage = coverage;
        self
    }

    /// Stopping compression rate.
    #[must_use]
    pub fn stop_compression_rate(mut self, rate: f64) -> Self {
        self.config.stop_compression_rate = rate;
        self
    }

    /// Observation ratio (see [`MinerConfig::set_observation_ratio`]).
    #[must_use]
    pub fn observation_ratio(mut self, ratio: f64) -> Self {
        self.config.set_observation_ratio(ratio);
        self
    }

    /// Maximum rule length.
    #[must_use]
    pub fn max_rule_length(mut self, length: usize) -> Self {
        self.config.max_rule_length = length;
        self
    }

    /// Sampling seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Counterexample ceiling for accepted rules.
    #[must_use]
    pub fn max_counterexamples(mut self, limit: usize) -> Self {
        self.config.max_counterexamples = limit;
        self
    }

    /// Normalizes and validates the configuration.
    ///
    /// # Errors
    /// Returns an error if a parameter is out of range after normalization.
    pub fn build(self) -> Result<MinerConfig, ConfigError> {
        let config = self.config.normalized();
        config.validate()?;
        Ok(config)
    }
}

/// Everything a full compression run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Input KB.
    pub input: KbLocation,
    /// Output location; defaults to `<input>_comp`.
    pub output: Option<KbLocation>,
    /// Negative KB, if any.
    pub negative: Option<KbLocation>,
    /// Re-derive the input from the output and compare.
    pub validate: bool,
    /// Run the template pre-pass and write its reports here.
    pub template_dir: Option<PathBuf>,
    /// Search parameters.
    pub miner: MinerConfig,
}

impl RunConfig {
    /// Creates a run configuration with default search parameters.
    #[must_use]
    pub fn new(input: KbLocation) -> Self {
        Self {
            input,
            output: None,
            negative: None,
            validate: false,
            template_dir: None,
            miner: MinerConfig::default(),
        }
    }

    /// Resolved output location.
    #[must_use]
    pub fn output_location(&self) -> KbLocation {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.compressed_sibling())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MinerConfig::default();
        assert_eq!(config.beamwidth, 3);
        assert_eq!(config.threads, 1);
        assert_eq!(config.eval_metric, EvalMetric::CompressionCapacity);
        assert!(config.estimation_enabled);
        assert!((config.observation_scale - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.sampling_mode(false), SamplingMode::ClosedWorld);
    }

    #[test]
    fn test_sampling_mode_with_negative_kb() {
        let exact = MinerConfig::default();
        assert_eq!(exact.sampling_mode(true), SamplingMode::ExactKb);
        let half = MinerConfig::builder().budget_factor(0.5).build().unwrap();
        assert_eq!(half.sampling_mode(true), SamplingMode::Budgeted { factor: 0.5 });
        assert_eq!(half.sampling_mode(false), SamplingMode::Budgeted { factor: 0.5 });
        let double = MinerConfig::builder().budget_factor(2.0).build().unwrap();
        assert_eq!(double.sampling_mode(true), SamplingMode::Adversarial { factor: 2.0 });
    }

    #[test]
    fn test_normalization_clamps() {
        let config = MinerConfig {
            threads: 0,
            beamwidth: 0,
            stop_compression_rate: 0.2,
            observation_scale: 0.3,
            ..MinerConfig::default()
        }
        .normalized();
        assert_eq!(config.threads, 1);
        assert_eq!(config.beamwidth, 1);
        assert!((config.stop_compression_rate - MIN_STOP_RATE).abs() < f64::EPSILON);
        assert!((config.observation_scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_observation_ratio_decides_mode_before_clamping() {
        let config = MinerConfig::builder().observation_ratio(0.5).build().unwrap();
        assert!(!config.estimation_enabled);

        let config = MinerConfig::builder().observation_ratio(3.0).build().unwrap();
        assert!(config.estimation_enabled);
        assert!((config.observation_scale - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.observations(), 9);
    }

    #[test]
    fn test_sampling_mode_selection() {
        let config = MinerConfig::builder().budget_factor(0.5).build().unwrap();
        assert_eq!(config.sampling_mode(false), SamplingMode::Budgeted { factor: 0.5 });
        assert_eq!(SamplingMode::Budgeted { factor: 0.5 }.budget(100), 50);

        let config = MinerConfig::builder().budget_factor(2.0).build().unwrap();
        assert_eq!(config.sampling_mode(true), SamplingMode::Adversarial { factor: 2.0 });

        let config = MinerConfig::default();
        assert_eq!(config.sampling_mode(true), SamplingMode::ExactKb);
    }

    #[test]
    fn test_negative_strategy_names() {
        for strategy in [
            NegativeStrategy::Uniform,
            NegativeStrategy::PositiveRelative,
            NegativeStrategy::NegativeInterval,
        ] {
            assert_eq!(strategy.name().parse::<NegativeStrategy>().unwrap(), strategy);
        }
        assert_eq!("negInterval".parse::<NegativeStrategy>().unwrap(), NegativeStrategy::NegativeInterval);
        let err = "constant-relevance".parse::<NegativeStrategy>().unwrap_err();
        assert!(format!("{err}").contains("constant-relevance"));
        assert_eq!(MinerConfig::default().negative_strategy, NegativeStrategy::Uniform);
    }

    #[test]
    fn test_validate_rejects_bad_coverage() {
        let err = MinerConfig::builder().min_fact_coverage(1.5).build().unwrap_err();
        assert!(format!("{err}").contains("min_fact_coverage"));

        let err = MinerConfig::builder().budget_factor(-1.0).build().unwrap_err();
        assert!(format!("{err}").contains("budget_factor"));
    }

    #[test]
    fn test_output_defaults_to_comp_sibling() {
        let run = RunConfig::new(KbLocation::new("/data", "family"));
        let out = run.output_location();
        assert_eq!(out.name, "family_comp");
        assert_eq!(out.dir(), PathBuf::from("/data/family_comp"));
    }
}
